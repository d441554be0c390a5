//! Exercises the driver's full lifecycle against a tiny shell-scripted USI
//! double instead of a real engine binary, mirroring the diagnostic-tail
//! and throttled-update behavior described in §4.G.

use std::time::Duration;

use shogi_engine::{EngineConfig, EngineDriver, EngineEvent};
use tokio::sync::mpsc;
use tokio::time::timeout;

const STARTPOS: &str = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";

fn fake_engine_script() -> &'static str {
    r#"
while IFS= read -r line; do
  case "$line" in
    usi)
      echo "id name FakeUsiEngine"
      echo "option name USI_Hash type spin default 256 min 1 max 1024"
      echo "option name Threads type spin default 1 min 1 max 512"
      echo "option name MultiPV type spin default 1 min 1 max 8"
      echo "usiok"
      ;;
    isready) echo "readyok" ;;
    "go infinite")
      echo "info depth 3 seldepth 5 multipv 1 score cp 64 nodes 500 nps 20000 hashfull 1 pv 7g7f 3c3d"
      ;;
    stop) echo "bestmove 7g7f" ;;
    *) ;;
  esac
done
"#
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        cmd: Some(vec!["sh".to_string(), "-c".to_string(), fake_engine_script().to_string()]),
        eval_dir: None,
        threads: 1,
        hash_mb: 64,
        usiok_timeout: Duration::from_secs(5),
        readyok_timeout: Duration::from_secs(5),
        post_setoption_readyok_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn full_handshake_then_analysis_update_then_stop() {
    let driver = EngineDriver::new(fast_config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    driver.attach_owner_sender(tx).await;

    driver.start_for_game(STARTPOS, &[], "root-node", 1).await.expect("analysis should start");

    let mut saw_update = false;
    for _ in 0..20 {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(EngineEvent::AnalysisUpdate { node_id, lines, .. })) => {
                assert_eq!(node_id, "root-node");
                assert_eq!(lines[0].pv_usi, vec!["7g7f".to_string(), "3c3d".to_string()]);
                saw_update = true;
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) => panic!("owner channel closed before an update arrived"),
            Err(_) => panic!("timed out waiting for analysis:update"),
        }
    }
    assert!(saw_update, "expected at least one analysis:update");

    let status = driver.status_wire().await;
    assert!(status.analysis_running);
    assert_eq!(status.engine_name.as_deref(), Some("FakeUsiEngine"));

    driver.stop("test finished").await;
    let status = driver.status_wire().await;
    assert!(!status.analysis_running);

    driver.shutdown().await;
}

#[tokio::test]
async fn missing_engine_executable_surfaces_engine_transient_error() {
    let config = EngineConfig {
        cmd: Some(vec!["/no/such/engine/binary".to_string()]),
        ..fast_config()
    };
    let driver = EngineDriver::new(config);
    let err = driver.start_for_game(STARTPOS, &[], "root-node", 1).await.unwrap_err();
    assert!(matches!(err, shogi_core::ShogiError::EngineTransient(_)));
}
