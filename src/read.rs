use crate::error::Error;
use crate::frame::{Frame, OpCode, MAX_PAYLOAD_SIZE};
use crate::write::Writer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

/// Pumps frames off one half of the channel session: text payloads are
/// forwarded to the dispatch side, pings answered, close honored. Runs on its
/// own task for the lifetime of the session.
pub struct ReadStream<R: AsyncReadExt + Unpin> {
    read: R,
    fragmented_message: Option<Vec<u8>>,
    frame_tx: UnboundedSender<Vec<u8>>,
    writer: Arc<Mutex<Writer>>,
    connected: Arc<AtomicBool>,
}

impl<R: AsyncReadExt + Unpin> ReadStream<R> {
    pub fn new(
        read: R,
        frame_tx: UnboundedSender<Vec<u8>>,
        writer: Arc<Mutex<Writer>>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            read,
            fragmented_message: None,
            frame_tx,
            writer,
            connected,
        }
    }

    pub async fn poll_frames(&mut self) -> Result<(), Error> {
        loop {
            let frame = match read_frame(&mut self.read).await {
                Ok(frame) => frame,
                Err(err) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            };

            match frame.opcode {
                OpCode::Text => {
                    if frame.final_fragment {
                        if self.frame_tx.send(frame.payload).is_err() {
                            // Dispatch side is gone, nothing left to feed.
                            break;
                        }
                    } else {
                        if self.fragmented_message.is_some() {
                            self.connected.store(false, Ordering::SeqCst);
                            return Err(Error::FragmentedInProgress);
                        }
                        self.fragmented_message = Some(frame.payload);
                    }
                }
                OpCode::Continue => match self.fragmented_message.as_mut() {
                    Some(fragmented) => {
                        fragmented.extend_from_slice(&frame.payload);
                        if frame.final_fragment {
                            let whole = self.fragmented_message.take().unwrap_or_default();
                            if self.frame_tx.send(whole).is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        self.connected.store(false, Ordering::SeqCst);
                        return Err(Error::InvalidContinuationFrame);
                    }
                },
                OpCode::Ping => {
                    let pong = self
                        .writer
                        .lock()
                        .await
                        .write_frame(Frame::pong(frame.payload))
                        .await;
                    if let Err(err) = pong {
                        self.connected.store(false, Ordering::SeqCst);
                        return Err(err);
                    }
                }
                OpCode::Close => {
                    // Best-effort close reply; the peer may already be gone.
                    let _ = self.writer.lock().await.write_frame(Frame::close()).await;
                    self.connected.store(false, Ordering::SeqCst);
                    break;
                }
                OpCode::Binary | OpCode::Pong => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub async fn read_frame<R: AsyncReadExt + Unpin>(read: &mut R) -> Result<Frame, Error> {
    let mut header = [0u8; 2];

    read.read_exact(&mut header)
        .await
        .map_err(|e| Error::io("read frame header", e))?;

    // MSB of the first byte flags the final fragment, the low nibble carries
    // the opcode.
    let final_fragment = (header[0] & 0b10000000) != 0;
    let opcode = OpCode::from(header[0] & 0b00001111)?;

    if !final_fragment && opcode.is_control() {
        return Err(Error::ControlFramesFragmented);
    }

    // Second byte: mask bit plus a 7-bit length, with 126/127 escaping to
    // 16-bit and 64-bit extended lengths.
    let masked = (header[1] & 0b10000000) != 0;
    let mut length = (header[1] & 0b01111111) as usize;

    if length == 126 {
        let mut be_bytes = [0u8; 2];
        read.read_exact(&mut be_bytes)
            .await
            .map_err(|e| Error::io("read frame length", e))?;
        length = u16::from_be_bytes(be_bytes) as usize;
    } else if length == 127 {
        let mut be_bytes = [0u8; 8];
        read.read_exact(&mut be_bytes)
            .await
            .map_err(|e| Error::io("read frame length", e))?;
        length = u64::from_be_bytes(be_bytes) as usize;
    }

    if length > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge);
    }

    let mask = if masked {
        let mut mask = [0u8; 4];
        read.read_exact(&mut mask)
            .await
            .map_err(|e| Error::io("read frame mask", e))?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; length];
    read.read_exact(&mut payload)
        .await
        .map_err(|e| Error::io("read frame payload", e))?;

    // Client payloads arrive XOR-masked with a four-byte key; undo it.
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame {
        final_fragment,
        opcode,
        payload,
    })
}
