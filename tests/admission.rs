use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tgab_fetch::config::FetchConfig;
use tgab_fetch::crawler::Downloader;

struct Server {
    base_url: String,
    in_flight_max: Arc<AtomicUsize>,
    arrivals: Arc<Mutex<Vec<Instant>>>,
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Server {
    fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.join();
    }
}

/// 每个请求在单独线程里处理，处理耗时 `latency`，记录到达时间和最大并发数
fn spawn_server(latency: Duration) -> Server {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let in_flight_max = Arc::new(AtomicUsize::new(0));
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let (shutdown, shutdown_rx) = mpsc::channel::<()>();

    let server_max = in_flight_max.clone();
    let server_arrivals = arrivals.clone();
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(20)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            server_arrivals.lock().unwrap().push(Instant::now());

            let in_flight = in_flight.clone();
            let max = server_max.clone();
            thread::spawn(move || {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                thread::sleep(latency);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = request.respond(tiny_http::Response::from_string("ok"));
            });
        }
    });

    Server {
        base_url,
        in_flight_max,
        arrivals,
        shutdown,
        handle,
    }
}

fn fetch_config(limit: usize, pace_ms: u64) -> FetchConfig {
    FetchConfig {
        concurrency_limit: limit,
        max_attempts: 1,
        pace_min_ms: pace_ms,
        pace_max_ms: pace_ms,
        timeout_secs: 10,
        user_agent: Some("tgab-fetch-test".to_owned()),
    }
}

async fn fetch_all(downloader: &Downloader, base_url: &str, count: usize) {
    let mut handles = Vec::new();
    for i in 0..count {
        let downloader = downloader.clone();
        let url = format!("{}/page/{}", base_url, i);
        handles.push(tokio::spawn(async move { downloader.page(&url).await }));
    }
    for handle in handles {
        let body = handle.await.unwrap().unwrap();
        assert_eq!(&body[..], b"ok");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_in_flight_never_exceed_limit() {
    let server = spawn_server(Duration::from_millis(100));
    let downloader = Downloader::new(&fetch_config(3, 0)).unwrap();

    fetch_all(&downloader, &server.base_url, 12).await;

    let max = server.in_flight_max.load(Ordering::SeqCst);
    assert!(max <= 3, "最大并发 {} 超过上限", max);
    assert!(max >= 2, "请求没有并发执行: {}", max);
    assert_eq!(server.arrivals.lock().unwrap().len(), 12);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permit_is_held_during_pause() {
    let pause = Duration::from_millis(200);
    let server = spawn_server(Duration::ZERO);
    let downloader = Downloader::new(&fetch_config(2, pause.as_millis() as u64)).unwrap();

    let started = Instant::now();
    fetch_all(&downloader, &server.base_url, 6).await;
    let elapsed = started.elapsed();

    // 两个许可，每个请求在响应后还要占用许可停顿 200ms，
    // 所以第 k+2 个请求最早在第 k 个请求到达 200ms 之后才能发出
    let mut arrivals = server.arrivals.lock().unwrap().clone();
    arrivals.sort();
    assert_eq!(arrivals.len(), 6);
    for window in arrivals.windows(3) {
        let gap = window[2] - window[0];
        assert!(gap >= Duration::from_millis(180), "间隔过短: {:?}", gap);
    }
    assert!(elapsed >= pause * 3);
    server.stop();
}
