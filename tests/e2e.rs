//! Full black-box conformance run against the built binaries.
//!
//! Takes well over a minute of wall-clock time per profile, so it only runs
//! with `--features heavy-tests`.

use fabrickv::client::{TransportProfile, TransportSelection};
use fabrickv::common::HarnessConfig;
use fabrickv::e2e::{Harness, ProfileReport};
use std::path::PathBuf;
use tempfile::TempDir;

fn bin_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fabrickv-server"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn harness(memfile_dir: &TempDir) -> Harness {
    Harness::new(HarnessConfig {
        bin_dir: bin_dir(),
        memfile_dir: memfile_dir.path().to_path_buf(),
        // ports are drawn from a range disjoint from the other tests
        port_range: (25300, 25500),
        settle_secs: 2,
        ..HarnessConfig::default()
    })
}

#[tokio::test]
#[cfg_attr(not(feature = "heavy-tests"), ignore)]
async fn test_conformance_over_tcp() {
    let memfiles = TempDir::new().unwrap();
    let report = harness(&memfiles)
        .run_profile(&TransportSelection::new(TransportProfile::Tcp))
        .await
        .unwrap();
    assert_eq!(report, ProfileReport::Passed);
    assert_eq!(std::fs::read_dir(memfiles.path()).unwrap().count(), 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "heavy-tests"), ignore)]
async fn test_conformance_over_shm() {
    let memfiles = TempDir::new().unwrap();
    let sockets = TempDir::new().unwrap();
    let selection = TransportSelection::new(TransportProfile::Shm)
        .with_mode(sockets.path().to_string_lossy().into_owned());
    let report = harness(&memfiles).run_profile(&selection).await.unwrap();
    assert_eq!(report, ProfileReport::Passed);
    assert_eq!(std::fs::read_dir(memfiles.path()).unwrap().count(), 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "heavy-tests"), ignore)]
async fn test_rdma_profile_is_skipped_or_passes() {
    let memfiles = TempDir::new().unwrap();
    let report = harness(&memfiles)
        .run_profile(&TransportSelection::new(TransportProfile::Rdma))
        .await
        .unwrap();
    assert!(!report.is_failure(), "{:?}", report);
}
