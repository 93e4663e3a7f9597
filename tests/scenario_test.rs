//! Four clients, each streaming one batch of fixed-size records to its own slot.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use turnstile::{
    Address, AppError, AppResult, BinaryReader, BinaryWriter, Context, Listener, Protocol,
    SlotGuard, SlotTable, StreamReader, StreamWriter,
};
use uuid::Uuid;

const CLIENTS: usize = 4;
const RECORDS: u64 = 500;
const HEADER_SIZE: u64 = 8 + 4;
const RECORD_SIZE: u64 = 16 + 8 + 8 + 8;

#[derive(Default)]
struct SlotStats {
    records: AtomicU64,
    bytes: AtomicU64,
}

struct RecordReceiver {
    table: Arc<SlotTable<SlotStats>>,
    completed: mpsc::Sender<usize>,
    claimed: Option<SlotGuard<SlotStats>>,
    connection_id: u64,
}

impl Protocol for RecordReceiver {
    async fn process<R: StreamReader, W: StreamWriter>(
        &mut self,
        reader: &mut BinaryReader<'_, R>,
        writer: &mut BinaryWriter<'_, W>,
    ) -> AppResult<bool> {
        let count = reader.read::<u64>().await?;
        let index = reader.read::<i32>().await?;
        let index = usize::try_from(index)
            .map_err(|_| AppError::MalformedProtocol(format!("negative index {}", index)))?;
        if self.claimed.is_none() {
            self.claimed = Some(self.table.claim(index, self.connection_id)?);
        }
        let Some(slot) = self.claimed.as_ref() else {
            return Ok(false);
        };

        let mut sum = 0i64;
        for _ in 0..count {
            let _id = reader.read::<Uuid>().await?;
            sum += reader.read::<i64>().await?;
            let _flags = reader.read::<i64>().await?;
            let _value = reader.read::<f64>().await?;
        }
        assert_eq!(sum, (0..count as i64).sum::<i64>());

        slot.records.fetch_add(count, Ordering::SeqCst);
        slot.bytes
            .fetch_add(HEADER_SIZE + count * RECORD_SIZE, Ordering::SeqCst);
        writer.write(count).await?;
        let _ = self.completed.send(index);
        Ok(true)
    }
}

fn batch(index: i32) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(&RECORDS.to_ne_bytes());
    message.extend_from_slice(&index.to_ne_bytes());
    for i in 0..RECORDS as i64 {
        message.extend_from_slice(Uuid::new_v4().as_bytes());
        message.extend_from_slice(&i.to_ne_bytes());
        message.extend_from_slice(&(i * 3).to_ne_bytes());
        message.extend_from_slice(&(i as f64 * 0.5).to_ne_bytes());
    }
    message
}

fn run_client(address: SocketAddr, index: i32, chunk: usize) -> std::io::Result<u64> {
    let mut stream = TcpStream::connect(address)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    for part in batch(index).chunks(chunk) {
        stream.write_all(part)?;
    }
    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply)?;
    Ok(u64::from_ne_bytes(reply))
}

#[test]
fn test_four_clients_fill_their_slots() -> AppResult<()> {
    let context = Context::new(2);
    let table = SlotTable::new(CLIENTS, |_| SlotStats::default());
    let (completed, signals) = mpsc::channel();
    let listener = Listener::with_factory(
        &context,
        Address::localhost(0),
        CLIENTS,
        {
            let table = table.clone();
            move |connection_id| RecordReceiver {
                table: table.clone(),
                completed: completed.clone(),
                claimed: None,
                connection_id,
            }
        },
    )?;
    let address = listener.local_addr().socket_addr();
    context.add(listener)?;
    context.start()?;

    // fragment sizes differ per client; the records must arrive identically
    let chunks = [1usize, 7, 40, 4096];
    let clients: Vec<_> = (0..CLIENTS)
        .map(|index| {
            let chunk = chunks[index];
            thread::spawn(move || run_client(address, index as i32, chunk))
        })
        .collect();

    let mut seen = Vec::new();
    for _ in 0..CLIENTS {
        let index = signals
            .recv_timeout(Duration::from_secs(30))
            .map_err(|e| AppError::IllegalStateError(format!("missing completion: {}", e)))?;
        seen.push(index);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);

    for client in clients {
        let acknowledged = client.join().map_err(|_| {
            AppError::IllegalStateError("client thread panicked".to_string())
        })??;
        assert_eq!(acknowledged, RECORDS);
    }

    let total_bytes: u64 = table.iter().map(|slot| slot.bytes.load(Ordering::SeqCst)).sum();
    assert_eq!(
        total_bytes,
        CLIENTS as u64 * (HEADER_SIZE + RECORDS * RECORD_SIZE)
    );
    for slot in table.iter() {
        assert_eq!(slot.records.load(Ordering::SeqCst), RECORDS);
    }

    context.stop()?;
    for index in 0..CLIENTS {
        assert_eq!(table.owner(index), None);
    }
    Ok(())
}
