use anvil_pool::prelude::*;
use std::time::Duration;

/// Pretends to send an email; fails every attempt when `fail` is set.
struct SendEmailJob {
    email: String,
    fail: bool,
}

#[async_trait]
impl JobAction for SendEmailJob {
    async fn run(&self, mut ctx: JobContext) -> AnvilResult<()> {
        tracing::info!("Sending to {}...", self.email);
        if self.fail {
            return Err(AnvilError::job_failed("error send mail"));
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                tracing::info!("Sending to {} successfully!", self.email);
                Ok(())
            }
            _ = ctx.shutdown.triggered() => {
                Err(AnvilError::job_failed("shutdown before the mail went out"))
            }
        }
    }
}

#[tokio::main]
async fn main() -> AnvilResult<()> {
    let config = PoolConfig {
        workers: WorkerConfig::with_workers(3),
        ..PoolConfig::development()
    };
    config.logging.init()?;

    let pool = WorkerPool::with_config(config)?;
    let shutdown = ShutdownController::new();
    pool.start(shutdown.signal())?;
    let ctrl_c = shutdown.trigger_on_ctrl_c();

    let ok = Job::new(
        "SendEmail",
        SendEmailJob {
            email: "test@gmail.com".to_string(),
            fail: false,
        },
    );
    let failing = Job::builder(
        "SendEmail",
        SendEmailJob {
            email: "test@gmail.com".to_string(),
            fail: true,
        },
    )
    .attempts(3)
    .build();

    for job in [ok, failing] {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit(job).await });
    }

    tracing::info!("Worker pool is running! Press Ctrl+C to stop...");
    let _ = ctrl_c.await;

    let report = pool.shutdown().await?;
    tracing::info!("Worker pool stopped: {:?}, stats: {:?}", report, pool.stats());
    Ok(())
}
