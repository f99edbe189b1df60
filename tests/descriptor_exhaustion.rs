//! Runs with the process out of file descriptors. Kept to a single test in
//! its own binary because the open file limit is process wide.
#![cfg(unix)]

use std::fs::File;
use std::time::Duration;

use netsweep::budget::ConcurrencyBudget;
use netsweep::device::Target;
use netsweep::input::{Protocol, ScanConfig};
use netsweep::scanner::{Outcome, PortProbe, Scanner};
use rlimit::Resource;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn scans_survive_running_out_of_descriptors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let target = Target::new("127.0.0.1", port, Protocol::Tcp);

    let (soft, hard) = Resource::NOFILE.get().unwrap();
    Resource::NOFILE.set(soft.min(256), hard).unwrap();

    let mut fillers = Vec::new();
    while let Ok(file) = File::open("/dev/null") {
        fillers.push(file);
    }
    assert!(fillers.len() > 2);

    // every attempt fails to allocate a socket, so the retry bound ends it
    let outcome = PortProbe::new(Duration::from_millis(20), 3)
        .probe(&target, &CancellationToken::new())
        .await;
    assert_eq!(outcome, Outcome::RetriesExhausted { attempts: 4 });

    // fewer free descriptors than permits: probes that miss out back off
    // and retry while holding their permit
    fillers.truncate(fillers.len() - 2);
    let scanner = Scanner::new(
        ScanConfig::builder()
            .ports([port])
            .timeout(Duration::from_millis(50))
            .exhaustion_retries(100)
            .build()
            .unwrap(),
        ConcurrencyBudget::new(8),
    );
    let targets = vec![target; 8];
    let devices = scanner.run_targets(&targets).await.unwrap();

    drop(fillers);
    Resource::NOFILE.set(soft, hard).unwrap();

    assert_eq!(devices.len(), 8);
    assert!(devices.iter().all(|d| d.open));
    assert_eq!(scanner.limiter().in_flight(), 0);
    assert!(scanner.limiter().peak_in_flight() <= 8);
    drop(listener);
}
