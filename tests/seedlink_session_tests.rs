use quakewave::cache::{CacheConfig, TimeSeriesCache};
use quakewave::core::Scnl;
use quakewave::resilience::ReconnectStrategy;
use quakewave::seedlink::{RecordBuilder, SeedLinkClient, SeedLinkConfig, SessionState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const T0: f64 = 1_600_000_000.0;
const WAIT: Duration = Duration::from_secs(5);

/// What the fake server does for every connection
#[derive(Clone, Default)]
struct Script {
    /// Complete frames written after the client's `END`
    frames: Vec<Vec<u8>>,
    /// Append the `END` marker after the frames
    finish_with_end: bool,
    /// Close the connection after the frames
    hang_up: bool,
    /// Frames answering any `INFO` request
    info: Vec<Vec<u8>>,
}

struct FakeServer {
    addr: SocketAddr,
    log: mpsc::UnboundedReceiver<(usize, String)>,
    seen: Vec<(usize, String)>,
}

impl FakeServer {
    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, log) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut conn_id = 0;
            while let Ok((stream, _)) = listener.accept().await {
                conn_id += 1;
                tokio::spawn(serve(stream, conn_id, script.clone(), tx.clone()));
            }
        });

        Self {
            addr,
            log,
            seen: Vec::new(),
        }
    }

    /// Wait until connection `conn` has sent `command`
    async fn wait_for(&mut self, conn: usize, command: &str) {
        let found = |seen: &[(usize, String)]| seen.iter().any(|(c, l)| *c == conn && l == command);
        timeout(WAIT, async {
            while !found(&self.seen) {
                let entry = self.log.recv().await.unwrap();
                self.seen.push(entry);
            }
        })
        .await
        .unwrap_or_else(|_| panic!("connection {} never sent '{}': {:?}", conn, command, self.seen));
    }

    fn commands(&self, conn: usize) -> Vec<String> {
        self.seen
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

async fn serve(
    stream: TcpStream,
    id: usize,
    script: Script,
    log: mpsc::UnboundedSender<(usize, String)>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let _ = log.send((id, line.clone()));
        let verb = line.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
        let reply: Vec<u8> = match verb.as_str() {
            "HELLO" => b"SeedLink v3.1 (fake server)\r\nTest Network\r\n".to_vec(),
            "STATION" | "SELECT" | "DATA" | "TIME" => b"OK\r\n".to_vec(),
            "END" => {
                let mut out = script.frames.concat();
                if script.finish_with_end {
                    out.extend_from_slice(b"END");
                }
                out
            }
            "INFO" => script.info.concat(),
            "BYE" => break,
            _ => b"ERROR\r\n".to_vec(),
        };
        if write.write_all(&reply).await.is_err() {
            break;
        }
        if verb == "END" && script.hang_up {
            break;
        }
    }
    let _ = log.send((id, "<closed>".to_string()));
}

fn anmo() -> Scnl {
    Scnl::new("ANMO", "BHZ", "IU", "00")
}

fn data_frame(sequence: u32, record: &[u8]) -> Vec<u8> {
    let mut frame = format!("SL{:06X}", sequence).into_bytes();
    frame.extend_from_slice(record);
    frame
}

/// `count` consecutive 10-sample records at 1 Hz starting at `T0`
fn packets(channel: &Scnl, count: u32) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let start = T0 + i as f64 * 10.0;
            let samples: Vec<i32> = (0..10).map(|k| (i * 10 + k) as i32).collect();
            let record = RecordBuilder::new(channel, start, 1.0)
                .sequence(i + 1)
                .build(&samples)
                .unwrap();
            data_frame(i + 1, &record)
        })
        .collect()
}

fn config(addr: SocketAddr, reconnect: ReconnectStrategy) -> SeedLinkConfig {
    SeedLinkConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        reconnect,
        connect_timeout_ms: 2_000,
        read_timeout_ms: 5_000,
        ..Default::default()
    }
}

fn fixed_retry() -> ReconnectStrategy {
    ReconnectStrategy::Fixed {
        delay_ms: 10,
        max_attempts: None,
    }
}

fn cache() -> Arc<TimeSeriesCache> {
    Arc::new(TimeSeriesCache::new(CacheConfig::default()).unwrap())
}

#[tokio::test]
async fn test_live_session_fills_cache() {
    let mut server = FakeServer::start(Script {
        frames: packets(&anmo(), 2),
        ..Default::default()
    })
    .await;
    let cache = cache();
    let mut client = SeedLinkClient::new(config(server.addr, fixed_retry()), cache.clone()).unwrap();
    let mut updates = client.subscribe();

    client.add_channel(&anmo());
    client.start().unwrap();

    for expected_start in [T0, T0 + 10.0] {
        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        assert_eq!(update.key, client.channel_key(&anmo()));
        assert_eq!(update.start, expected_start);
        assert_eq!(update.end, expected_start + 10.0);
    }

    let wave = cache
        .get_wave(&client.channel_key(&anmo()), T0, T0 + 20.0)
        .unwrap();
    assert_eq!(wave.samples, (0..20).collect::<Vec<_>>());
    assert_eq!(client.cursor(&anmo()), Some(T0 + 20.0));
    assert_eq!(client.metrics().packets(), 2);
    assert_eq!(client.metrics().samples(), 20);
    assert_eq!(client.state(), SessionState::Streaming { packets: 2 });

    server.wait_for(1, "END").await;
    assert_eq!(
        server.commands(1),
        vec!["HELLO", "STATION ANMO IU", "SELECT 00BHZ.D", "DATA", "END"]
    );

    client.stop().await.unwrap();
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_subscription_change_resubscribes_with_union() {
    let mut server = FakeServer::start(Script::default()).await;
    let mut client = SeedLinkClient::new(config(server.addr, fixed_retry()), cache()).unwrap();
    let ccm = Scnl::new("CCM", "BHZ", "IU", "");

    client.add_channel(&anmo());
    client.start().unwrap();
    server.wait_for(1, "END").await;

    assert!(client.add_channel(&ccm));
    server.wait_for(1, "<closed>").await;
    server.wait_for(2, "END").await;

    assert_eq!(
        server.commands(2),
        vec![
            "HELLO",
            "STATION ANMO IU",
            "SELECT 00BHZ.D",
            "DATA",
            "STATION CCM IU",
            "SELECT BHZ.D",
            "DATA",
            "END"
        ]
    );
    assert_eq!(client.selector(), "ANMO_IU:00BHZ,CCM_IU:BHZ");
    assert_eq!(client.metrics().reconnects(), 1);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_live_reconnect_resumes_from_next_sequence() {
    let mut server = FakeServer::start(Script {
        frames: packets(&anmo(), 2),
        hang_up: true,
        ..Default::default()
    })
    .await;
    let mut client = SeedLinkClient::new(config(server.addr, fixed_retry()), cache()).unwrap();

    client.add_channel(&anmo());
    client.start().unwrap();

    server.wait_for(2, "END").await;
    let second = server.commands(2);
    assert!(second.contains(&"DATA 000003".to_string()), "{:?}", second);
    assert!(client.metrics().reconnects() >= 1);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_replay_ends_on_end_marker() {
    let mut server = FakeServer::start(Script {
        frames: packets(&anmo(), 1),
        finish_with_end: true,
        ..Default::default()
    })
    .await;
    let cache = cache();
    let mut client = SeedLinkClient::replay(
        config(server.addr, ReconnectStrategy::Never),
        cache.clone(),
        T0,
        T0 + 20.0,
    )
    .unwrap();

    client.add_channel(&anmo());
    client.start().unwrap();
    timeout(WAIT, client.wait()).await.unwrap().unwrap();

    server.wait_for(1, "END").await;
    assert!(server
        .commands(1)
        .contains(&"TIME 2020,09,13,12,26,40 2020,09,13,12,27,00".to_string()));
    let wave = cache
        .get_wave(&client.channel_key(&anmo()), T0, T0 + 20.0)
        .unwrap();
    assert_eq!(wave.len(), 10);
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_replay_ends_when_every_cursor_passes_end() {
    let server = FakeServer::start(Script {
        frames: packets(&anmo(), 3),
        ..Default::default()
    })
    .await;
    let mut client = SeedLinkClient::replay(
        config(server.addr, ReconnectStrategy::Never),
        cache(),
        T0,
        T0 + 20.0,
    )
    .unwrap();

    client.add_channel(&anmo());
    client.start().unwrap();
    timeout(WAIT, client.wait()).await.unwrap().unwrap();

    assert!(client.cursor(&anmo()).unwrap() >= T0 + 20.0);
    assert_eq!(client.metrics().reconnects(), 0);
}

#[tokio::test]
async fn test_bad_packet_counted_and_skipped() {
    let mut frames = vec![data_frame(1, &[0u8; 512])];
    frames.extend(packets(&anmo(), 1));
    let server = FakeServer::start(Script {
        frames,
        ..Default::default()
    })
    .await;
    let mut client = SeedLinkClient::new(config(server.addr, fixed_retry()), cache()).unwrap();
    let mut updates = client.subscribe();

    client.add_channel(&anmo());
    client.start().unwrap();
    timeout(WAIT, updates.recv()).await.unwrap().unwrap();

    assert_eq!(client.metrics().decode_errors(), 1);
    assert_eq!(client.metrics().packets(), 1);
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_gives_up_when_server_unreachable() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut client = SeedLinkClient::new(
        config(
            addr,
            ReconnectStrategy::Fixed {
                delay_ms: 10,
                max_attempts: Some(2),
            },
        ),
        cache(),
    )
    .unwrap();

    client.add_channel(&anmo());
    client.start().unwrap();
    let err = timeout(WAIT, client.wait()).await.unwrap().unwrap_err();

    assert!(err.is_transient());
    assert_eq!(client.metrics().reconnects(), 2);
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_list_streams_over_info() {
    let xml = concat!(
        r#"<?xml version="1.0"?><seedlink software="fake">"#,
        r#"<station name="ANMO" network="IU">"#,
        r#"<stream location="00" seedname="BHZ" type="D"/>"#,
        r#"<stream location="00" seedname="LOG" type="L"/>"#,
        r#"</station>"#,
        r#"<station name="CCM" network="IU">"#,
        r#"<stream location="" seedname="BHZ" type="D"/>"#,
        r#"</station></seedlink>"#
    );
    let (first, second) = xml.split_at(xml.len() / 2);
    let builder = RecordBuilder::new(&Scnl::new("INFO", "LOG", "SL", ""), T0, 1.0);
    let mut head = b"SLINFO *".to_vec();
    head.extend(builder.build_text(first).unwrap());
    let mut tail = b"SLINFO  ".to_vec();
    tail.extend(builder.build_text(second).unwrap());

    let mut server = FakeServer::start(Script {
        info: vec![head, tail],
        ..Default::default()
    })
    .await;
    let client = SeedLinkClient::new(config(server.addr, fixed_retry()), cache()).unwrap();

    let streams = timeout(WAIT, client.list_streams()).await.unwrap().unwrap();
    assert_eq!(
        streams,
        vec![Scnl::new("ANMO", "BHZ", "IU", "00"), Scnl::new("CCM", "BHZ", "IU", "")]
    );
    assert_eq!(client.state(), SessionState::Disconnected);

    server.wait_for(1, "INFO STREAMS").await;
    server.wait_for(1, "BYE").await;
}
