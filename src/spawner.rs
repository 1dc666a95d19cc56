use crate::bootstrap::{PlacementService, SessionProvider};
use crate::config::LoadConfig;
use crate::room::RoomActor;
use futures::future::join_all;
use log::{error, info};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Fans the configured load out: spawner tasks come up at staggered random
/// intervals, each starting its share of room tasks, also staggered. Rooms
/// recreate themselves up to the configured count; a set stop flag ends the
/// recreation. Shared state is limited to the room counter and that flag.
pub struct Spawner {
    config: Arc<LoadConfig>,
    session: Arc<dyn SessionProvider>,
    placement: Arc<dyn PlacementService>,
    stop: Arc<AtomicBool>,
    next_room_number: Arc<AtomicUsize>,
}

impl Spawner {
    pub fn new(
        config: Arc<LoadConfig>,
        session: Arc<dyn SessionProvider>,
        placement: Arc<dyn PlacementService>,
    ) -> Self {
        Spawner {
            config,
            session,
            placement,
            stop: Arc::new(AtomicBool::new(false)),
            next_room_number: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Flag that stops room recreation across every spawner; running rooms
    /// finish their current lifecycle.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub async fn run(&self) {
        let mut spawners = Vec::new();

        for spawner_number in 0..self.config.spawner_count {
            info!("=== starting spawner #{}", spawner_number);

            spawners.push(tokio::spawn(spawner_loop(
                Arc::clone(&self.config),
                Arc::clone(&self.session),
                Arc::clone(&self.placement),
                Arc::clone(&self.stop),
                Arc::clone(&self.next_room_number),
            )));

            let delay = rand::rng().random_range(2000..5000);
            sleep(Duration::from_millis(delay)).await;
        }

        join_all(spawners).await;
    }
}

async fn spawner_loop(
    config: Arc<LoadConfig>,
    session: Arc<dyn SessionProvider>,
    placement: Arc<dyn PlacementService>,
    stop: Arc<AtomicBool>,
    next_room_number: Arc<AtomicUsize>,
) {
    let mut rooms = Vec::new();

    for _ in 0..config.rooms_per_spawner {
        let delay = rand::rng().random_range(1000..2000);
        sleep(Duration::from_millis(delay)).await;

        rooms.push(tokio::spawn(room_loop(
            Arc::clone(&config),
            Arc::clone(&session),
            Arc::clone(&placement),
            Arc::clone(&stop),
            Arc::clone(&next_room_number),
        )));
    }

    join_all(rooms).await;
}

async fn room_loop(
    config: Arc<LoadConfig>,
    session: Arc<dyn SessionProvider>,
    placement: Arc<dyn PlacementService>,
    stop: Arc<AtomicBool>,
    next_room_number: Arc<AtomicUsize>,
) {
    let mut recreated = 0;

    while !stop.load(Ordering::SeqCst) && recreated < config.room_recreate_count {
        recreated += 1;
        let room_number = next_room_number.fetch_add(1, Ordering::SeqCst) + 1;

        let room = RoomActor::new(
            Arc::clone(&config),
            Arc::clone(&session),
            Arc::clone(&placement),
        );

        if let Err(err) = room.run(room_number).await {
            error!("error from room #{}: {}", room_number, err);
            break;
        }
    }
}
