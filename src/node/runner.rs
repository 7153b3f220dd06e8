//! Per-node actor runner: one tokio task owning one node's state.

use crate::node::{Address, Context, Inbox, Network, Node};
use crate::utils::PaxlabError;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

/// Closure run inside the node's task with exclusive access to its state.
type LocalOp<N> = Box<
    dyn FnOnce(&mut N, &mut Context<<N as Node>::Msg, <N as Node>::Timer>)
        + Send,
>;

/// Handle to a node running in its own tokio task. All of the node's
/// handlers (network deliveries, fired timers, local closures) run
/// serialized inside that task.
pub struct NodeHandle<N: Node> {
    /// Address of the node.
    address: Address,

    /// Sender side of the local closure channel.
    tx_local: mpsc::UnboundedSender<LocalOp<N>>,

    /// Sender side of the exit signal.
    tx_exit: Option<oneshot::Sender<()>>,

    /// Join handle of the node's task.
    node_handle: Option<JoinHandle<()>>,
}

impl<N: Node> NodeHandle<N> {
    /// Registers the node on the network and spawns its event loop. Must be
    /// called within the context of a tokio runtime.
    pub fn spawn(
        node: N,
        network: Network<N::Msg>,
    ) -> Result<Self, PaxlabError> {
        let address = node.address().clone();
        let rx_net = network.register(&address)?;
        let (tx_local, rx_local) = mpsc::unbounded_channel();
        let (tx_exit, rx_exit) = oneshot::channel();

        let node_handle = tokio::spawn(Self::node_loop(
            node, network, rx_net, rx_local, rx_exit,
        ));
        pf_debug!(address; "node task spawned");

        Ok(NodeHandle {
            address,
            tx_local,
            tx_exit: Some(tx_exit),
            node_handle: Some(node_handle),
        })
    }

    /// Address of the node.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Runs a closure against the node's state inside its task. Effects
    /// queued on the context are flushed afterwards as usual.
    pub fn run_local(
        &self,
        op: impl FnOnce(&mut N, &mut Context<N::Msg, N::Timer>) + Send + 'static,
    ) -> Result<(), PaxlabError> {
        self.tx_local.send(Box::new(op))?;
        Ok(())
    }

    /// Reads something out of the node's state.
    pub async fn inspect<R>(
        &self,
        peek: impl FnOnce(&N) -> R + Send + 'static,
    ) -> Result<R, PaxlabError>
    where
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run_local(move |node, _| {
            let _ = tx.send(peek(&*node));
        })?;
        Ok(rx.await?)
    }

    /// Stops the node's task and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<(), PaxlabError> {
        if let Some(tx_exit) = self.tx_exit.take() {
            let _ = tx_exit.send(());
        }
        if let Some(node_handle) = self.node_handle.take() {
            node_handle.await?;
        }
        pf_debug!(self.address; "node task exited");
        Ok(())
    }

    /// Event loop of a node.
    async fn node_loop(
        mut node: N,
        network: Network<N::Msg>,
        mut rx_net: Inbox,
        mut rx_local: mpsc::UnboundedReceiver<LocalOp<N>>,
        mut rx_exit: oneshot::Receiver<()>,
    ) {
        let me = node.address().clone();
        let (tx_timer, mut rx_timer) = mpsc::unbounded_channel();
        let mut ctx = Context::new(me.clone());

        node.init(&mut ctx);
        Self::flush(&me, &mut ctx, &network, &tx_timer);

        loop {
            tokio::select! {
                // exit signal (or handle dropped)
                _ = &mut rx_exit => break,

                // network delivery
                Some((from, bytes)) = rx_net.recv() => {
                    // a disconnected node hears nothing, including messages
                    // already in flight when it got cut off
                    if network.is_connected(&me) {
                        match Network::<N::Msg>::decode(&bytes) {
                            Ok(msg) => node.on_message(from, msg, &mut ctx),
                            Err(e) => {
                                pf_error!(me; "error decoding msg from {}: {}",
                                              from, e);
                            }
                        }
                    }
                },

                // fired timer
                Some(timer) = rx_timer.recv() => {
                    node.on_timer(timer, &mut ctx);
                },

                // local closure
                Some(op) = rx_local.recv() => {
                    op(&mut node, &mut ctx);
                },

                else => break,
            }

            Self::flush(&me, &mut ctx, &network, &tx_timer);
        }

        network.unregister(&me);
    }

    /// Pushes queued sends into the network and arms queued timers.
    fn flush(
        me: &Address,
        ctx: &mut Context<N::Msg, N::Timer>,
        network: &Network<N::Msg>,
        tx_timer: &mpsc::UnboundedSender<N::Timer>,
    ) {
        for (to, msg) in ctx.take_sends() {
            if let Err(e) = network.send(me, &to, &msg) {
                pf_error!(me; "error sending -> {}: {}", to, e);
            }
        }

        for (timer, dur) in ctx.take_timers() {
            let tx_timer = tx_timer.clone();
            tokio::spawn(async move {
                time::sleep(dur).await;
                // node may have exited meanwhile
                let _ = tx_timer.send(timer);
            });
        }
    }
}

impl<N: Node> Drop for NodeHandle<N> {
    fn drop(&mut self) {
        if let Some(tx_exit) = self.tx_exit.take() {
            let _ = tx_exit.send(());
        }
    }
}

#[cfg(test)]
mod runner_tests {
    use super::*;
    use tokio::time::Duration;

    /// Echoes every number back to its sender incremented by one, and counts
    /// fired timers.
    struct Echo {
        me: Address,
        got: Vec<u64>,
        ticks: usize,
    }

    impl Node for Echo {
        type Msg = u64;
        type Timer = ();

        fn address(&self) -> &Address {
            &self.me
        }

        fn init(&mut self, ctx: &mut Context<u64, ()>) {
            ctx.set_timer((), Duration::from_millis(10));
        }

        fn on_message(
            &mut self,
            from: Address,
            msg: u64,
            ctx: &mut Context<u64, ()>,
        ) {
            self.got.push(msg);
            if msg < 5 {
                ctx.send(msg + 1, &from);
            }
        }

        fn on_timer(&mut self, _timer: (), _ctx: &mut Context<u64, ()>) {
            self.ticks += 1;
        }
    }

    fn echo(idx: usize) -> Echo {
        Echo {
            me: Address::server(idx),
            got: vec![],
            ticks: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_pong() -> Result<(), PaxlabError> {
        let net = Network::reliable();
        let a = NodeHandle::spawn(echo(0), net.clone())?;
        let b = NodeHandle::spawn(echo(1), net.clone())?;
        let b_addr = b.address().clone();
        a.run_local(move |_, ctx| ctx.send(0, &b_addr))?;

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(a.inspect(|n| n.got.clone()).await?, vec![1, 3, 5]);
        assert_eq!(b.inspect(|n| n.got.clone()).await?, vec![0, 2, 4]);
        assert_eq!(a.inspect(|n| n.ticks).await?, 1);

        a.shutdown().await?;
        b.shutdown().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnected_hears_nothing() -> Result<(), PaxlabError> {
        let net = Network::reliable();
        let a = NodeHandle::spawn(echo(0), net.clone())?;
        let b = NodeHandle::spawn(echo(1), net.clone())?;
        net.disconnect(b.address());
        let b_addr = b.address().clone();
        a.run_local(move |_, ctx| ctx.send(0, &b_addr))?;

        time::sleep(Duration::from_millis(100)).await;
        assert!(b.inspect(|n| n.got.clone()).await?.is_empty());
        Ok(())
    }
}
