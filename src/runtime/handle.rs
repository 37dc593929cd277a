use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    core::book::VoucherBook,
    persist::{StoreError, StoreResult, VoucherRepository},
    types::{Registration, Strategy},
    voucher::{Voucher, Window},
};

use super::events::VoucherEvent;

/// Failure of a registrar call.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The store rejected or failed the call.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The registrar task has stopped.
    #[error("registrar is not running")]
    ChannelClosed,
    /// A blocking store call panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Registrar settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Registration path the store runs.
    pub strategy: Strategy,
    /// Command queue capacity.
    pub queue_bound: usize,
    /// Answer known conflicts from memory without touching the store.
    pub precheck: bool,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Isolated,
            queue_bound: 256,
            precheck: true,
        }
    }
}

/// Cloneable front end to the registrar task.
///
/// Every registration sent through any clone is processed one at a time, so
/// within a process the registrar is the single writer. Writers in other
/// processes still rely on the store's own strategy.
#[derive(Clone)]
pub struct RegistrarHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<VoucherEvent>,
}

type SharedRepo = Arc<Mutex<Box<dyn VoucherRepository>>>;

enum Command {
    Register {
        voucher: Voucher,
        resp: oneshot::Sender<Result<Registration, RuntimeError>>,
    },
    Exists {
        code: String,
        window: Window,
        resp: oneshot::Sender<Result<bool, RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the registrar task on the current tokio runtime.
///
/// Known vouchers are loaded into memory first when `precheck` is on.
pub fn spawn_registrar(repo: Box<dyn VoucherRepository>, config: RegistrarConfig) -> RegistrarHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<VoucherEvent>(1024);
    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let repo: SharedRepo = Arc::new(Mutex::new(repo));
        let mut book = warm_book(&repo, &config).await;
        info!(strategy = ?config.strategy, known = book.len(), "registrar started");

        while let Some(cmd) = cmd_rx.recv().await {
            let done = handle_command(cmd, &repo, &mut book, &events_tx_loop, &config).await;
            if done {
                break;
            }
        }
        info!("registrar stopped");
    });

    RegistrarHandle { cmd_tx, events_tx }
}

impl RegistrarHandle {
    /// Receives events for registrations processed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<VoucherEvent> {
        self.events_tx.subscribe()
    }

    /// Registers `voucher` with the configured strategy.
    pub async fn register(&self, voucher: Voucher) -> Result<Registration, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { voucher, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Advisory overlap check; see [`VoucherRepository::exists`].
    pub async fn exists(&self, code: impl Into<String>, window: Window) -> Result<bool, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Exists {
                code: code.into(),
                window,
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Stops the registrar after commands already queued ahead of this one.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(
    cmd: Command,
    repo: &SharedRepo,
    book: &mut VoucherBook,
    events_tx: &broadcast::Sender<VoucherEvent>,
    config: &RegistrarConfig,
) -> bool {
    match cmd {
        Command::Register { voucher, resp } => {
            let res = register_one(voucher, repo, book, events_tx, config).await;
            let _ = resp.send(res);
        }
        Command::Exists { code, window, resp } => {
            let res = if let Err(err) = window.validate() {
                Err(StoreError::from(err).into())
            } else if config.precheck && book.exists(&code, &window) {
                Ok(true)
            } else {
                run_blocking(repo, move |repo| repo.exists(&code, &window)).await
            };
            let _ = resp.send(res);
        }
        Command::Shutdown { resp } => {
            let _ = resp.send(());
            return true;
        }
    }

    false
}

async fn register_one(
    voucher: Voucher,
    repo: &SharedRepo,
    book: &mut VoucherBook,
    events_tx: &broadcast::Sender<VoucherEvent>,
    config: &RegistrarConfig,
) -> Result<Registration, RuntimeError> {
    voucher.validate().map_err(StoreError::from)?;

    if config.precheck && book.exists(&voucher.code, &voucher.window) {
        debug!(code = %voucher.code, "conflict answered from book");
        let _ = events_tx.send(VoucherEvent::Conflict {
            code: voucher.code,
            window: voucher.window,
        });
        return Ok(Registration::Conflict);
    }

    let strategy = config.strategy;
    let submitted = voucher.clone();
    let outcome = run_blocking(repo, move |repo| repo.register_with(strategy, &submitted)).await?;

    match outcome {
        Registration::Inserted(id) => {
            book.insert(&voucher);
            let _ = events_tx.send(VoucherEvent::Registered {
                id,
                code: voucher.code,
            });
            Ok(Registration::Inserted(id))
        }
        Registration::Conflict => {
            let _ = events_tx.send(VoucherEvent::Conflict {
                code: voucher.code,
                window: voucher.window,
            });
            Ok(Registration::Conflict)
        }
    }
}

async fn warm_book(repo: &SharedRepo, config: &RegistrarConfig) -> VoucherBook {
    if !config.precheck {
        return VoucherBook::new();
    }
    match run_blocking(repo, |repo| repo.load_all()).await {
        Ok(stored) => VoucherBook::from_vouchers(stored.iter().map(|s| &s.voucher)),
        Err(err) => {
            warn!(error = %err, "could not load vouchers, starting with an empty book");
            VoucherBook::new()
        }
    }
}

async fn run_blocking<T, F>(repo: &SharedRepo, f: F) -> Result<T, RuntimeError>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn VoucherRepository>) -> StoreResult<T> + Send + 'static,
{
    let repo = Arc::clone(repo);
    tokio::task::spawn_blocking(move || {
        let mut repo = repo.blocking_lock();
        f(&mut *repo)
    })
    .await
    .map_err(|e| RuntimeError::Join(e.to_string()))?
    .map_err(RuntimeError::from)
}
