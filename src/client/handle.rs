//! Caller-side handle of a client node running on its own task.

use crate::client::{GenericClient, ResultState};
use crate::node::{Address, Network, NodeHandle};
use crate::utils::PaxlabError;

use tokio::sync::{oneshot, watch};
use tokio::time::{self, Duration};

/// Blocking-style API over a spawned client node: send a command, poll or
/// wait for its result.
pub struct ClientHandle<C: GenericClient> {
    /// Handle of the running client node.
    node: NodeHandle<C>,

    /// Receiver side of the client's result watch channel.
    rx_result: watch::Receiver<ResultState<C::Result>>,

    /// Sequence number of the last command sent through this handle.
    last_seq: Option<u64>,
}

impl<C: GenericClient> ClientHandle<C> {
    /// Spawns the client node on the network.
    pub fn spawn(
        client: C,
        network: Network<C::Msg>,
    ) -> Result<Self, PaxlabError> {
        let rx_result = client.result_watch();
        let node = NodeHandle::spawn(client, network)?;
        Ok(ClientHandle {
            node,
            rx_result,
            last_seq: None,
        })
    }

    /// Address of the client node.
    pub fn address(&self) -> &Address {
        self.node.address()
    }

    /// Underlying node handle.
    pub fn node(&self) -> &NodeHandle<C> {
        &self.node
    }

    /// Submits a command; any previously outstanding command is abandoned.
    pub async fn send_command(
        &mut self,
        command: C::Command,
    ) -> Result<u64, PaxlabError> {
        let (tx_seq, rx_seq) = oneshot::channel();
        self.node.run_local(move |client, ctx| {
            let seq = client.send_command(command, ctx);
            let _ = tx_seq.send(seq);
        })?;
        let seq = rx_seq.await?;
        self.last_seq = Some(seq);
        Ok(seq)
    }

    /// True if the result of the last command sent has arrived.
    pub fn has_result(&self) -> bool {
        let state = self.rx_result.borrow();
        Some(state.seq) == self.last_seq && state.result.is_some()
    }

    /// Waits for the result of the last command sent.
    pub async fn get_result(&mut self) -> Result<C::Result, PaxlabError> {
        let seq = match self.last_seq {
            Some(seq) => seq,
            None => {
                return logged_err!(self.node.address(); "no command sent yet")
            }
        };

        let state = self
            .rx_result
            .wait_for(|state| state.seq == seq && state.result.is_some())
            .await?;
        match &state.result {
            Some(result) => Ok(result.clone()),
            None => Err(PaxlabError::msg("result vanished while waiting")),
        }
    }

    /// Waits for the result of the last command sent, for at most `timeout`.
    pub async fn get_result_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<C::Result, PaxlabError> {
        time::timeout(timeout, self.get_result()).await?
    }

    /// Stops the client node.
    pub async fn shutdown(self) -> Result<(), PaxlabError> {
        self.node.shutdown().await
    }
}
