use anyhow::Result;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{spawn_blocking, JoinHandle};

/// User interrupt shared between a signal listener and the training loop.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Raises the flag on the first Ctrl-C. Must be called inside a tokio
    /// runtime.
    pub fn listen_ctrl_c(&self) -> JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    flag.raise();
                }
                Err(error) => warn!("cannot listen for ctrl-c: {}", error),
            }
        })
    }
}

/// Runs `task` on tokio's blocking pool.
pub async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle: JoinHandle<Result<T>> = spawn_blocking(task);
    handle.await?
}

#[tokio::test]
async fn test_run_blocking_returns_result() -> Result<()> {
    let flag = InterruptFlag::new();
    let observed = {
        let flag = flag.clone();
        run_blocking(move || {
            flag.raise();
            Ok(41 + 1)
        })
        .await?
    };

    assert_eq!(observed, 42);
    assert!(flag.is_raised());
    assert!(run_blocking(|| -> Result<()> { anyhow::bail!("boom") }).await.is_err());

    Ok(())
}
