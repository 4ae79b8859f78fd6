//! Build-the-stack configuration, loadable from TOML or JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rdma::qp::QpTuning;

/// Tuning knobs for a whole deployment: queue depths, worker counts, the
/// rendezvous listen address, and the RC connection timers.
///
/// Every field has a default, so a partial file is fine:
///
/// ```toml
/// listen_port = 13337
///
/// [qp]
/// retry_cnt = 7
/// rnr_retry = 7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RC connection timers and limits.
    pub qp: QpTuning,

    /// Completion queue depth.
    pub cq_depth: u32,

    /// Outstanding receive work requests on an SRQ.
    pub srq_max_wr: u32,

    /// Completions drained per CQ poll.
    pub poller_batch: usize,

    /// Executor worker threads.
    pub executor_workers: usize,

    /// Bound on the executor queue; `None` means unbounded.
    pub executor_queue_bound: Option<usize>,

    /// Rendezvous listen hostname; `None` binds the wildcard address.
    pub listen_hostname: Option<String>,

    /// Rendezvous listen port; 0 asks the kernel for a free port.
    pub listen_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            qp: QpTuning::default(),
            cq_depth: crate::rdma::cq::Cq::DEFAULT_CQ_DEPTH,
            srq_max_wr: crate::rdma::srq::Srq::DEFAULT_MAX_WR,
            poller_batch: crate::exec::CqPoller::DEFAULT_BATCH_SIZE,
            executor_workers: crate::exec::Executor::DEFAULT_NR_WORKERS,
            executor_queue_bound: None,
            listen_hostname: None,
            listen_port: 0,
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use super::*;

    fn scratch_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = env::temp_dir().join(format!("rdmawait-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_match_the_engine() {
        let config = Config::default();
        assert_eq!(config.cq_depth, 128);
        assert_eq!(config.srq_max_wr, 1024);
        assert_eq!(config.poller_batch, 16);
        assert_eq!(config.executor_workers, 4);
        assert_eq!(config.qp.timeout, 14);
        assert_eq!(config.qp.retry_cnt, 1);
        assert_eq!(config.qp.rnr_retry, 1);
        assert_eq!(config.qp.min_rnr_timer, 12);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let path = scratch_file(
            "config.toml",
            "listen_port = 13337\n\n[qp]\nretry_cnt = 7\nrnr_retry = 7\n",
        );
        let config = Config::load_toml(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.listen_port, 13337);
        assert_eq!(config.qp.retry_cnt, 7);
        assert_eq!(config.qp.rnr_retry, 7);
        // Untouched fields keep their defaults.
        assert_eq!(config.qp.timeout, 14);
        assert_eq!(config.cq_depth, 128);
    }

    #[test]
    fn json_and_bad_input() {
        let path = scratch_file("config.json", r#"{ "executor_workers": 2 }"#);
        let config = Config::load_json(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.executor_workers, 2);

        let path = scratch_file("bad.toml", "listen_port = \"not a port\"");
        let result = Config::load_toml(&path);
        fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
