use crate::error::Error;
use crate::frame::Frame;
use crate::stream::SessionStream;
use rand::random;
use tokio::io::{AsyncWriteExt, WriteHalf};

pub enum WriterKind {
    /// Payloads are masked, as the protocol requires from clients.
    Client,
    /// Unmasked writes; used by the in-test chat servers.
    Server,
}

pub struct Writer {
    write_half: WriteHalf<SessionStream>,
    kind: WriterKind,
}

impl Writer {
    pub fn new(write_half: WriteHalf<SessionStream>, kind: WriterKind) -> Self {
        Self { write_half, kind }
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let masked = matches!(self.kind, WriterKind::Client);

        // First byte: final-fragment bit shifted into the MSB, opcode in the
        // low nibble.
        let first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
        let payload_len = frame.payload.len();
        let mask_bit = if masked { 0b1000_0000 } else { 0 };

        let mut header: Vec<u8> = vec![first_byte];

        // Payload lengths up to 125 fit the second byte; 126/127 switch to
        // 16-bit and 64-bit extended length fields.
        if payload_len <= 125 {
            header.push(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            header.push(mask_bit | 126);
            header.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            header.push(mask_bit | 127);
            header.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        self.write_half
            .write_all(&header)
            .await
            .map_err(|e| Error::io("write frame header", e))?;

        if masked {
            let mask: [u8; 4] = random();
            self.write_half
                .write_all(&mask)
                .await
                .map_err(|e| Error::io("write frame mask", e))?;

            let masked_payload: Vec<u8> = frame
                .payload
                .iter()
                .enumerate()
                .map(|(i, &byte)| byte ^ mask[i % 4])
                .collect();

            self.write_half
                .write_all(&masked_payload)
                .await
                .map_err(|e| Error::io("write frame payload", e))?;
        } else {
            self.write_half
                .write_all(&frame.payload)
                .await
                .map_err(|e| Error::io("write frame payload", e))?;
        }

        Ok(())
    }
}
