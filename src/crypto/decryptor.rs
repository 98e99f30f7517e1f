// Alacrity - Apple Music ALAC Downloader Bot
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Decryption helper dialogue.
//!
//! One TCP connection per track. Samples stream through in order; whenever
//! the sample-description index changes, a new (id, key) header is sent,
//! preceded by a four-zero-byte boundary for every group after the first.
//! Each sample goes out as a little-endian u32 length plus ciphertext, and
//! exactly that many plaintext bytes come back. Five zero bytes close the
//! dialogue.
//!
//! The helper holds the actual keys; this side never sees them.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Result};
use crate::hls::PREFETCH_KEY;
use crate::mp4::Sample;
use crate::retry::{retry_with_backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

/// Song id substituted when the active key is the prefetch key.
const DEFAULT_ID: &str = "0";

/// Decrypt every sample of a track through the helper at `addr`.
///
/// Returns the concatenated plaintext in sample order; its length equals the
/// summed ciphertext length. `on_progress` receives
/// (bytes_processed, total_bytes) after each sample.
///
/// # Errors
/// `decryption_failure` for key-index violations and any wire-level failure;
/// `cancelled` when the token fires between samples (the connection is
/// dropped on the spot, which the helper treats as an abort).
pub async fn decrypt_samples<F>(
    addr: &str,
    song_id: &str,
    samples: &[Sample],
    keys: &[String],
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<Vec<u8>>
where
    F: FnMut(u64, u64),
{
    // The key list must cover every referenced description index before any
    // ciphertext crosses the wire.
    for sample in samples {
        if sample.desc_index as usize >= keys.len() {
            return Err(DownloadError::decryption("decryption key index out of range")
                .with_context("desc_index", sample.desc_index.to_string())
                .with_context("keys", keys.len().to_string()));
        }
    }

    let total: u64 = samples.iter().map(|s| s.data.len() as u64).sum();

    let mut conn = retry_with_backoff(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY, || async {
        TcpStream::connect(addr)
            .await
            .map_err(|err| DownloadError::from_dial("error connecting to decryption helper", err))
    })
    .await
    .map_err(|err| err.with_context("addr", addr.to_string()))?;

    let mut plaintext: Vec<u8> = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    let mut processed: u64 = 0;
    let mut last_index: Option<u32> = None;

    for sample in samples {
        if cancel.is_cancelled() {
            // Dropping the socket mid-track is the abort signal.
            drop(conn);
            return Err(DownloadError::cancelled("decryption cancelled"));
        }

        if last_index != Some(sample.desc_index) {
            if last_index.is_some() {
                write_wire(&mut conn, &[0, 0, 0, 0]).await?;
            }

            let key = &keys[sample.desc_index as usize];
            let id = if key == PREFETCH_KEY { DEFAULT_ID } else { song_id };

            write_wire(&mut conn, &[id.len() as u8]).await?;
            write_wire(&mut conn, id.as_bytes()).await?;
            write_wire(&mut conn, &[key.len() as u8]).await?;
            write_wire(&mut conn, key.as_bytes()).await?;

            last_index = Some(sample.desc_index);
        }

        let len = u32::try_from(sample.data.len()).map_err(|_| {
            DownloadError::decryption("sample exceeds 32-bit wire frame")
        })?;
        write_wire(&mut conn, &len.to_le_bytes()).await?;
        write_wire(&mut conn, &sample.data).await?;

        let mut decrypted = vec![0u8; sample.data.len()];
        conn.read_exact(&mut decrypted).await.map_err(|err| {
            DownloadError::decryption("short read from decryption helper").caused_by(err)
        })?;

        plaintext.extend_from_slice(&decrypted);
        processed += sample.data.len() as u64;
        on_progress(processed, total);
    }

    // Termination marker; best effort, the track is already complete.
    let _ = conn.write_all(&[0, 0, 0, 0, 0]).await;

    Ok(plaintext)
}

async fn write_wire(conn: &mut TcpStream, bytes: &[u8]) -> Result<()> {
    conn.write_all(bytes).await.map_err(|err| {
        DownloadError::decryption("write to decryption helper failed").caused_by(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    fn sample(data: &[u8], desc_index: u32) -> Sample {
        Sample {
            data: data.to_vec(),
            duration: 1024,
            desc_index,
        }
    }

    fn keys() -> Vec<String> {
        vec![
            PREFETCH_KEY.to_string(),
            "skd://itunes.apple.com/key/a1/c23".to_string(),
        ]
    }

    /// Helper double: XOR-0x5A "decryption" that also records every byte it
    /// received, so tests can assert the exact wire framing.
    async fn spawn_helper() -> (String, Arc<Mutex<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            loop {
                // id header or a marker.
                let mut id_len = [0u8; 1];
                if sock.read_exact(&mut id_len).await.is_err() {
                    return;
                }
                log.lock().await.push(id_len[0]);
                let mut id = vec![0u8; id_len[0] as usize];
                if sock.read_exact(&mut id).await.is_err() {
                    return;
                }
                log.lock().await.extend_from_slice(&id);

                let mut key_len = [0u8; 1];
                if sock.read_exact(&mut key_len).await.is_err() {
                    return;
                }
                log.lock().await.push(key_len[0]);
                let mut key = vec![0u8; key_len[0] as usize];
                if sock.read_exact(&mut key).await.is_err() {
                    return;
                }
                log.lock().await.extend_from_slice(&key);

                // samples until a zero-length frame (group boundary or end).
                loop {
                    let mut len_bytes = [0u8; 4];
                    if sock.read_exact(&mut len_bytes).await.is_err() {
                        return;
                    }
                    log.lock().await.extend_from_slice(&len_bytes);
                    let len = u32::from_le_bytes(len_bytes) as usize;
                    if len == 0 {
                        // Might be the 5-byte termination; try to consume the
                        // trailing zero.
                        let mut trail = [0u8; 1];
                        match sock.read_exact(&mut trail).await {
                            Ok(_) if trail[0] == 0 => {
                                log.lock().await.push(0);
                                return;
                            }
                            Ok(_) => {
                                // Start of the next group's id header.
                                log.lock().await.push(trail[0]);
                                let mut id = vec![0u8; trail[0] as usize];
                                if sock.read_exact(&mut id).await.is_err() {
                                    return;
                                }
                                log.lock().await.extend_from_slice(&id);
                                let mut key_len = [0u8; 1];
                                if sock.read_exact(&mut key_len).await.is_err() {
                                    return;
                                }
                                log.lock().await.push(key_len[0]);
                                let mut key = vec![0u8; key_len[0] as usize];
                                if sock.read_exact(&mut key).await.is_err() {
                                    return;
                                }
                                log.lock().await.extend_from_slice(&key);
                                continue;
                            }
                            Err(_) => return,
                        }
                    }
                    let mut payload = vec![0u8; len];
                    if sock.read_exact(&mut payload).await.is_err() {
                        return;
                    }
                    log.lock().await.extend_from_slice(&payload);
                    let transformed: Vec<u8> = payload.iter().map(|b| b ^ 0x5A).collect();
                    if sock.write_all(&transformed).await.is_err() {
                        return;
                    }
                }
            }
        });

        (addr, received)
    }

    #[tokio::test]
    async fn plaintext_matches_ciphertext_sizes() {
        let (addr, _) = spawn_helper().await;
        let samples = vec![sample(&[1, 2, 3, 4], 0), sample(&[5, 6], 0)];
        let cancel = CancellationToken::new();

        let mut reports = Vec::new();
        let out = decrypt_samples(&addr, "1559523359", &samples, &keys(), &cancel, |done, total| {
            reports.push((done, total));
        })
        .await
        .unwrap();

        assert_eq!(out.len(), 6);
        assert_eq!(out, vec![1 ^ 0x5A, 2 ^ 0x5A, 3 ^ 0x5A, 4 ^ 0x5A, 5 ^ 0x5A, 6 ^ 0x5A]);
        assert_eq!(reports, vec![(4, 6), (6, 6)]);
    }

    #[tokio::test]
    async fn wire_framing_follows_the_group_protocol() {
        let (addr, received) = spawn_helper().await;
        // Two groups: prefetch key (id "0"), then key 1 (real song id).
        let samples = vec![sample(&[0xAA, 0xBB], 0), sample(&[0xCC], 1)];
        let cancel = CancellationToken::new();

        decrypt_samples(&addr, "42", &samples, &keys(), &cancel, |_, _| {})
            .await
            .unwrap();

        // Give the helper a beat to drain the termination marker.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let log = received.lock().await.clone();
        let mut expected = Vec::new();
        // Group 1: id "0" + prefetch key.
        expected.push(1u8);
        expected.extend_from_slice(b"0");
        expected.push(PREFETCH_KEY.len() as u8);
        expected.extend_from_slice(PREFETCH_KEY.as_bytes());
        // Sample 1.
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&[0xAA, 0xBB]);
        // Group boundary, then group 2 header with the real id.
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.push(2u8);
        expected.extend_from_slice(b"42");
        let key1 = "skd://itunes.apple.com/key/a1/c23";
        expected.push(key1.len() as u8);
        expected.extend_from_slice(key1.as_bytes());
        // Sample 2.
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(0xCC);
        // Termination marker (the helper logs the first 5 zero bytes).
        expected.extend_from_slice(&[0, 0, 0, 0, 0]);

        assert_eq!(log, expected);
    }

    #[tokio::test]
    async fn out_of_range_key_index_fails_before_dialing() {
        let samples = vec![sample(&[1], 5)];
        let cancel = CancellationToken::new();
        // Unroutable port; the validation must trip first.
        let err = decrypt_samples("127.0.0.1:1", "42", &samples, &keys(), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::DecryptionFailure));
    }

    #[tokio::test]
    async fn cancellation_surfaces_between_samples() {
        let (addr, _) = spawn_helper().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let samples = vec![sample(&[1, 2], 0)];
        let err = decrypt_samples(&addr, "42", &samples, &keys(), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn helper_hangup_is_a_decryption_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = sock.read(&mut buf).await;
            // Drop without answering.
        });

        let samples = vec![sample(&[1, 2, 3], 0)];
        let cancel = CancellationToken::new();
        let err = decrypt_samples(&addr, "42", &samples, &keys(), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::DecryptionFailure));
    }
}
