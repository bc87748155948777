use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, info_span, Instrument};

use super::simulator::{Envelope, NetworkSimulator};
use crate::common::config::GenesisConfig;
use crate::common::crypto::{Digest, Keypair};
use crate::consensus::{Block, ConsensusEngine, Evidence, LedgerReader, Outbound, Timeout, ValidatorSet};
use crate::error::{ConfigError, NodeError, TransactionError};
use crate::execution::Transaction;

const COMMAND_CAPACITY: usize = 64;

pub struct NodeConfig {
    pub index: usize,
    pub keypair: Keypair,
    pub genesis: GenesisConfig,
}

pub enum Command {
    SubmitTransaction {
        tx: Transaction,
        reply: oneshot::Sender<Result<Digest, TransactionError>>,
    },
    Evidence {
        reply: oneshot::Sender<Vec<Evidence>>,
    },
    Shutdown,
}

/// One validator's actor: owns the engine and drives it from the network
/// inbox, local commands and its step timer.
struct Node {
    engine: ConsensusEngine,
    network: Arc<NetworkSimulator>,
    inbox: mpsc::Receiver<Envelope>,
    commands: mpsc::Receiver<Command>,
}

impl Node {
    async fn run(mut self) -> Result<(), NodeError> {
        self.engine.start()?;
        self.flush();

        let mut timer: Option<(Instant, Timeout)> = None;
        loop {
            if let Some(timeout) = self.engine.take_timeout() {
                timer = Some((Instant::now() + timeout.duration, timeout));
            }
            let deadline = timer.map(|(at, _)| at);

            // Queued messages and commands go first, so a quorum that is
            // already in the inbox is seen before the timer fires.
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::SubmitTransaction { tx, reply }) => {
                        let result = self.engine.submit_transaction(tx);
                        let _ = reply.send(result);
                    }
                    Some(Command::Evidence { reply }) => {
                        let _ = reply.send(self.engine.evidence());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(envelope) = self.inbox.recv() => {
                    self.engine.handle_message(envelope.from, envelope.message)?;
                }
                _ = wait(deadline) => {
                    if let Some((_, timeout)) = timer.take() {
                        self.engine.on_timeout(timeout)?;
                    }
                }
            }
            self.flush();
        }

        info!(
            validator = self.engine.index(),
            height = self.engine.height(),
            "validator stopped"
        );
        Ok(())
    }

    fn flush(&mut self) {
        let from = self.engine.index();
        for outbound in self.engine.take_outbound() {
            match outbound {
                Outbound::Broadcast(message) => self.network.broadcast(from, message),
                Outbound::Send { to, message } => self.network.deliver(from, to, message),
            }
        }
    }
}

async fn wait(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Client side of a running validator.
pub struct NodeHandle {
    index: usize,
    commands: mpsc::Sender<Command>,
    ledger: LedgerReader,
    task: JoinHandle<Result<(), NodeError>>,
}

/// Spawns validator `config.index` on `network`, reading from `inbox`.
/// Must be called inside a tokio runtime.
pub fn start_node(
    config: NodeConfig,
    network: Arc<NetworkSimulator>,
    inbox: mpsc::Receiver<Envelope>,
) -> Result<NodeHandle, ConfigError> {
    let NodeConfig {
        index,
        keypair,
        genesis,
    } = config;
    genesis.validate()?;

    let validators = Arc::new(ValidatorSet::from_config(&genesis.validators)?);
    let engine = ConsensusEngine::new(index, keypair, &genesis, validators)?;
    let ledger = engine.ledger_reader();
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

    let node = Node {
        engine,
        network,
        inbox,
        commands: commands_rx,
    };
    let task = tokio::spawn(
        async move {
            let result = node.run().await;
            if let Err(e) = &result {
                error!(error = %e, "validator halted");
            }
            result
        }
        .instrument(info_span!("validator", index)),
    );

    Ok(NodeHandle {
        index,
        commands: commands_tx,
        ledger,
        task,
    })
}

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Validates `tx` against the committed state and queues it for
    /// inclusion. Returns the transaction hash.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Digest, NodeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SubmitTransaction { tx, reply })
            .await
            .map_err(|_| NodeError::Stopped)?;
        let hash = response.await.map_err(|_| NodeError::Stopped)??;
        Ok(hash)
    }

    /// The height this validator is currently trying to finalize.
    pub fn current_height(&self) -> u64 {
        self.ledger.height() + 1
    }

    pub fn finalized_height(&self) -> u64 {
        self.ledger.height()
    }

    /// Finalized blocks from genesis onward.
    pub fn finalized_blocks(&self) -> Vec<Block> {
        self.ledger.blocks()
    }

    pub fn ledger(&self) -> LedgerReader {
        self.ledger.clone()
    }

    /// State commitment after the last finalized block.
    pub fn state_commitment(&self) -> Digest {
        self.ledger
            .get(self.ledger.height())
            .map(|entry| entry.block.header.state_hash)
            .unwrap_or_default()
    }

    pub async fn evidence(&self) -> Result<Vec<Evidence>, NodeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Evidence { reply })
            .await
            .map_err(|_| NodeError::Stopped)?;
        response.await.map_err(|_| NodeError::Stopped)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the validator and returns how its loop ended.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        // A halted validator has already dropped its receiver.
        let _ = self.commands.send(Command::Shutdown).await;
        self.task.await.map_err(|_| NodeError::Stopped)?
    }
}
