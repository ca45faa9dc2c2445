use dws_ingest::{DwsReader, DwsReaderConfig, ScanParser};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_reader_forwards_parsed_scans_and_reconnects() {
    let device = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = device.local_addr().unwrap().port();

    let (sink, mut scans) = mpsc::channel(8);
    let reader = DwsReader::new(
        DwsReaderConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        },
        ScanParser::delimited("{Code},{Weight}", ",").unwrap(),
        sink,
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(reader.run(cancel.clone()));

    let (mut stream, _) = tokio::time::timeout(WAIT, device.accept())
        .await
        .unwrap()
        .unwrap();
    stream
        .write_all(b"ABC123,1500\nbroken\nDEF456,2\n")
        .await
        .unwrap();

    let first = tokio::time::timeout(WAIT, scans.recv()).await.unwrap().unwrap();
    assert_eq!(first.barcode, "ABC123");
    assert_eq!(first.weight, Some(1500.0));

    let second = tokio::time::timeout(WAIT, scans.recv()).await.unwrap().unwrap();
    assert_eq!(second.barcode, "DEF456");

    drop(stream);

    let (mut stream, _) = tokio::time::timeout(WAIT, device.accept())
        .await
        .expect("reader did not reconnect")
        .unwrap();
    stream.write_all(b"GHI789,3\n").await.unwrap();
    let third = tokio::time::timeout(WAIT, scans.recv()).await.unwrap().unwrap();
    assert_eq!(third.barcode, "GHI789");

    cancel.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_reader_backs_off_when_device_drops_every_connection() {
    let device = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = device.local_addr().unwrap().port();

    let (sink, _scans) = mpsc::channel(8);
    let reader = DwsReader::new(
        DwsReaderConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        },
        ScanParser::json(),
        sink,
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(reader.run(cancel.clone()));

    let deadline = Instant::now() + Duration::from_millis(1_200);
    let mut connections = 0;
    while let Ok(Ok((stream, _))) = tokio::time::timeout_at(deadline, device.accept()).await {
        connections += 1;
        drop(stream);
    }

    // 0, +100ms, +500ms fit in the window; +1s does not
    assert!(
        (2..=4).contains(&connections),
        "expected backoff between dials, got {} connections",
        connections
    );

    cancel.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}
