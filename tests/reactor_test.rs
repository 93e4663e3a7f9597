use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use turnstile::{
    Address, Admission, AppError, AppResult, BinaryReader, BinaryWriter, Context, Listener,
    Protocol, ReactorConfig, StreamReader, StreamWriter,
};

/// Echoes single bytes; byte 0 panics, byte 1 fails the turn.
#[derive(Clone, Default)]
struct Echo {
    turns: Arc<AtomicU64>,
}

impl Protocol for Echo {
    async fn process<R: StreamReader, W: StreamWriter>(
        &mut self,
        reader: &mut BinaryReader<'_, R>,
        writer: &mut BinaryWriter<'_, W>,
    ) -> AppResult<bool> {
        let value = reader.read::<u8>().await?;
        self.turns.fetch_add(1, Ordering::SeqCst);
        match value {
            0 => panic!("poisoned byte"),
            1 => Err(AppError::MalformedProtocol("rejected byte".to_string())),
            _ => {
                writer.write(value).await?;
                Ok(true)
            }
        }
    }
}

/// Echoes `u32` sequence numbers.
#[derive(Clone)]
struct Sequence;

impl Protocol for Sequence {
    async fn process<R: StreamReader, W: StreamWriter>(
        &mut self,
        reader: &mut BinaryReader<'_, R>,
        writer: &mut BinaryWriter<'_, W>,
    ) -> AppResult<bool> {
        let seq = reader.read::<u32>().await?;
        writer.write(seq).await?;
        Ok(true)
    }
}

/// Answers one byte with far more data than the socket buffers hold.
#[derive(Clone, Default)]
struct Flood {
    started: Arc<AtomicBool>,
}

const FLOOD_CHUNK: usize = 64 * 1024;
const FLOOD_CHUNKS: usize = 1024;

impl Protocol for Flood {
    async fn process<R: StreamReader, W: StreamWriter>(
        &mut self,
        reader: &mut BinaryReader<'_, R>,
        writer: &mut BinaryWriter<'_, W>,
    ) -> AppResult<bool> {
        reader.read::<u8>().await?;
        self.started.store(true, Ordering::SeqCst);
        let chunk = vec![0xa5u8; FLOOD_CHUNK];
        for _ in 0..FLOOD_CHUNKS {
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(true)
    }
}

fn connect(address: SocketAddr) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(address)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn echo_byte(stream: &mut TcpStream, value: u8) -> std::io::Result<u8> {
    stream.write_all(&[value])?;
    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply)?;
    Ok(reply[0])
}

/// True once the peer has closed, either cleanly or by reset.
fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn start_echo(max_connections: usize) -> AppResult<(Context, SocketAddr, Echo, Admission)> {
    let context = Context::new(2);
    let echo = Echo::default();
    let listener = Listener::new(&context, Address::localhost(0), max_connections, echo.clone())?;
    let address = listener.local_addr().socket_addr();
    let admission = listener.admission();
    context.add(listener)?;
    context.start()?;
    Ok((context, address, echo, admission))
}

#[test]
fn test_admission_is_bounded() -> AppResult<()> {
    let (context, address, _, admission) = start_echo(2)?;

    let mut first = connect(address)?;
    let mut second = connect(address)?;
    assert_eq!(echo_byte(&mut first, 10)?, 10);
    assert_eq!(echo_byte(&mut second, 11)?, 11);
    assert_eq!(admission.active(), 2);

    // the third peer completes the handshake in the backlog but is not served
    let mut third = connect(address)?;
    third.set_read_timeout(Some(Duration::from_millis(300)))?;
    third.write_all(&[12])?;
    let mut reply = [0u8; 1];
    let err = third.read_exact(&mut reply).err();
    assert!(matches!(
        err.map(|e| e.kind()),
        Some(ErrorKind::WouldBlock | ErrorKind::TimedOut)
    ));
    assert_eq!(admission.active(), 2);

    drop(first);
    third.set_read_timeout(Some(Duration::from_secs(5)))?;
    third.read_exact(&mut reply)?;
    assert_eq!(reply[0], 12);
    assert!(admission.active() <= admission.max());
    assert_eq!(echo_byte(&mut second, 13)?, 13);

    context.stop()
}

#[test]
fn test_graceful_shutdown() -> AppResult<()> {
    let context = Context::new(2);
    let echo = Echo::default();
    let listener = Listener::new(&context, Address::localhost(0), 8, echo.clone())?;
    let address = listener.local_addr().socket_addr();
    context.add(listener)?;
    context.start()?;

    let mut clients = Vec::new();
    for value in 2..5u8 {
        let mut client = connect(address)?;
        assert_eq!(echo_byte(&mut client, value)?, value);
        clients.push(client);
    }
    // a turn suspended in the middle of a message, on a listener added while running
    let sequence = Listener::new(&context, Address::localhost(0), 1, Sequence)?;
    let sequence_address = sequence.local_addr().socket_addr();
    let sequence_admission = sequence.admission();
    context.add(sequence)?;
    let mut in_turn = connect(sequence_address)?;
    in_turn.write_all(&[1, 2])?;
    assert!(wait_until(|| sequence_admission.active() == 1));

    let started = Instant::now();
    context.stop()?;
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!context.is_running());

    for client in clients.iter_mut() {
        assert!(is_closed(client));
    }
    assert!(is_closed(&mut in_turn));

    let turns = echo.turns.load(Ordering::SeqCst);
    // writes after stop may fail; either way nothing is processed
    let _ = clients[0].write_all(&[7]);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(echo.turns.load(Ordering::SeqCst), turns);

    context.stop()?;
    let late = Listener::new(&context, Address::localhost(0), 1, Echo::default())?;
    assert!(matches!(
        context.add(late),
        Err(AppError::IllegalStateError(_))
    ));
    Ok(())
}

#[test]
fn test_faults_stay_on_their_connection() -> AppResult<()> {
    let (context, address, echo, admission) = start_echo(4)?;

    let mut healthy = connect(address)?;
    assert_eq!(echo_byte(&mut healthy, 42)?, 42);

    let mut panicking = connect(address)?;
    panicking.write_all(&[0])?;
    assert!(is_closed(&mut panicking));

    let mut failing = connect(address)?;
    failing.write_all(&[1])?;
    assert!(is_closed(&mut failing));

    assert_eq!(echo_byte(&mut healthy, 43)?, 43);
    assert!(wait_until(|| admission.active() == 1));

    let mut replacement = connect(address)?;
    assert_eq!(echo_byte(&mut replacement, 44)?, 44);
    assert_eq!(echo.turns.load(Ordering::SeqCst), 5);

    context.stop()
}

#[test]
fn test_replies_keep_request_order() -> AppResult<()> {
    const COUNT: u32 = 2000;

    let context = Context::new(4);
    let listener = Listener::new(&context, Address::localhost(0), 2, Sequence)?;
    let address = listener.local_addr().socket_addr();
    context.add(listener)?;
    context.start()?;

    let mut client = connect(address)?;
    let writer_stream = client.try_clone()?;
    let writer = thread::spawn(move || -> std::io::Result<()> {
        let mut stream = writer_stream;
        for seq in 0..COUNT {
            stream.write_all(&seq.to_ne_bytes())?;
        }
        Ok(())
    });

    let mut reply = [0u8; 4];
    for expected in 0..COUNT {
        client.read_exact(&mut reply)?;
        assert_eq!(u32::from_ne_bytes(reply), expected);
    }
    writer
        .join()
        .map_err(|_| AppError::IllegalStateError("writer thread panicked".to_string()))??;

    context.stop()
}

#[test]
fn test_remove_closes_listener_connections() -> AppResult<()> {
    let context = Context::new(2);
    let removed = Listener::new(&context, Address::localhost(0), 2, Echo::default())?;
    let removed_address = removed.local_addr().socket_addr();
    let kept = Listener::new(&context, Address::localhost(0), 2, Echo::default())?;
    let kept_address = kept.local_addr().socket_addr();
    let removed_id = context.add(removed)?;
    context.add(kept)?;
    context.start()?;

    let mut doomed = connect(removed_address)?;
    assert_eq!(echo_byte(&mut doomed, 5)?, 5);
    let mut survivor = connect(kept_address)?;
    assert_eq!(echo_byte(&mut survivor, 6)?, 6);

    assert!(context.remove(removed_id));
    assert!(is_closed(&mut doomed));
    assert_eq!(echo_byte(&mut survivor, 7)?, 7);

    context.stop()
}

#[test]
fn test_stop_cancels_blocked_flush() -> AppResult<()> {
    let mut config = ReactorConfig::default();
    config.context.worker_threads = 2;
    config.context.shutdown_timeout_ms = 10_000;
    let context = Context::with_config(config);
    let flood = Flood::default();
    let listener = Listener::new(&context, Address::localhost(0), 1, flood.clone())?;
    let address = listener.local_addr().socket_addr();
    let admission = listener.admission();
    context.add(listener)?;
    context.start()?;

    // the client never reads, so the reply stalls once the socket buffers fill
    let mut client = connect(address)?;
    client.write_all(&[1])?;
    assert!(wait_until(|| flood.started.load(Ordering::SeqCst)));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(admission.active(), 1);

    let started = Instant::now();
    context.stop()?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(admission.active(), 0);
    drop(client);
    Ok(())
}
