use chat_swarm::bootstrap::HttpBootstrap;
use chat_swarm::config::LoadConfig;
use chat_swarm::spawner::Spawner;
use log::info;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = LoadConfig::default();
    if let Ok(server_root) = std::env::var("CHAT_SWARM_SERVER") {
        config.server_root = server_root;
    }

    info!(
        "targeting '{}': {} spawners x {} rooms, {} users per room",
        config.server_root,
        config.spawner_count,
        config.rooms_per_spawner,
        config.total_room_users()
    );

    let config = Arc::new(config);
    let bootstrap =
        Arc::new(HttpBootstrap::new(&config).expect("couldn't build the bootstrap http client"));

    Spawner::new(config, bootstrap.clone(), bootstrap).run().await;
}
