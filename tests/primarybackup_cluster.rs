//! Primary-backup clusters running on the tokio runtime over the simulated
//! network.

use paxlab::primarybackup::{PbClient, PbMsg, PbServer, View, ViewServer};
use paxlab::{
    Address, ClientHandle, KvCommand, KvResult, KvStore, Network, NodeHandle,
    PaxlabError,
};

use tokio::time::{self, Duration, Instant};

type Net = Network<PbMsg<KvStore>>;
type Vs = NodeHandle<ViewServer<KvStore>>;
type Server = NodeHandle<PbServer<KvStore>>;
type Client = ClientHandle<PbClient<KvStore>>;

const WAIT: Duration = Duration::from_secs(10);

struct Cluster {
    net: Net,
    vs: Vs,
    servers: Vec<Server>,
}

impl Cluster {
    fn spawn(n: usize) -> Result<Self, PaxlabError> {
        let net = Net::reliable();
        let vs = NodeHandle::spawn(
            ViewServer::new_and_setup(
                Address::view_server(),
                Some("ping_check_ms = 50"),
            )?,
            net.clone(),
        )?;
        let servers = (0..n)
            .map(|s| {
                let server = PbServer::new_and_setup(
                    Address::server(s),
                    Address::view_server(),
                    KvStore::new(),
                    Some("ping_interval_ms = 10\nforward_retry_ms = 20"),
                )?;
                NodeHandle::spawn(server, net.clone())
            })
            .collect::<Result<Vec<_>, PaxlabError>>()?;
        Ok(Cluster { net, vs, servers })
    }

    fn client(&self, idx: usize) -> Result<Client, PaxlabError> {
        let client = PbClient::new_and_setup(
            Address::client(idx),
            Address::view_server(),
            Some("retry_interval_ms = 50"),
        )?;
        ClientHandle::spawn(client, self.net.clone())
    }

    fn server(&self, addr: &Address) -> &Server {
        let idx = self
            .servers
            .iter()
            .position(|s| s.address() == addr)
            .unwrap();
        &self.servers[idx]
    }

    /// Waits until the view server sits at an acknowledged view with both a
    /// primary and a backup, and the backup holds the primary's state.
    async fn wait_full_view(&self) -> Result<View, PaxlabError> {
        let deadline = Instant::now() + WAIT;
        loop {
            let (view, acked) =
                self.vs.inspect(|vs| (vs.view().clone(), vs.is_acked())).await?;
            if let (true, Some(p), Some(b)) =
                (acked, view.primary.as_ref(), view.backup.as_ref())
            {
                let p_app = self.server(p).inspect(|s| s.app().clone()).await?;
                let b_app = self.server(b).inspect(|s| s.app().clone()).await?;
                if p_app == b_app {
                    return Ok(view);
                }
            }
            if Instant::now() > deadline {
                return Err(PaxlabError::msg(format!(
                    "no full view reached, at {}",
                    view
                )));
            }
            time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(self) -> Result<(), PaxlabError> {
        for s in self.servers {
            s.shutdown().await?;
        }
        self.vs.shutdown().await
    }
}

fn append(key: &str, value: &str) -> KvCommand {
    KvCommand::Append {
        key: key.into(),
        value: value.into(),
    }
}

async fn call(
    client: &mut Client,
    cmd: KvCommand,
) -> Result<KvResult, PaxlabError> {
    client.send_command(cmd).await?;
    client.get_result_timeout(WAIT).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn basic_ops_replicated() -> Result<(), PaxlabError> {
    let cluster = Cluster::spawn(2)?;
    let mut client = cluster.client(0)?;

    assert_eq!(
        call(&mut client, KvCommand::Get { key: "foo".into() }).await?,
        KvResult::KeyNotFound
    );
    assert_eq!(
        call(
            &mut client,
            KvCommand::Put {
                key: "foo".into(),
                value: "bar".into()
            }
        )
        .await?,
        KvResult::PutOk
    );
    assert_eq!(
        call(&mut client, append("foo", "baz")).await?,
        KvResult::AppendResult {
            value: "barbaz".into()
        }
    );

    let view = cluster.wait_full_view().await?;
    assert!(view.view_num >= 2);
    let primary = view.primary.clone().unwrap();
    let app = cluster.server(&primary).inspect(|s| s.app().clone()).await?;
    assert_eq!(app.len(), 1);

    client.shutdown().await?;
    cluster.shutdown().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn primary_failover_keeps_state() -> Result<(), PaxlabError> {
    let cluster = Cluster::spawn(3)?;
    let mut client = cluster.client(0)?;

    let mut expected = String::new();
    for i in 0..5 {
        let piece = format!("{};", i);
        expected.push_str(&piece);
        assert_eq!(
            call(&mut client, append("k", &piece)).await?,
            KvResult::AppendResult {
                value: expected.clone()
            }
        );
    }

    let old_view = cluster.wait_full_view().await?;
    let old_primary = old_view.primary.clone().unwrap();
    let old_backup = old_view.backup.clone().unwrap();
    cluster.net.disconnect(&old_primary);

    for i in 5..10 {
        let piece = format!("{};", i);
        expected.push_str(&piece);
        assert_eq!(
            call(&mut client, append("k", &piece)).await?,
            KvResult::AppendResult {
                value: expected.clone()
            }
        );
    }

    // the old backup took over, and the spare became the new backup
    let view = cluster.wait_full_view().await?;
    assert!(view.view_num > old_view.view_num);
    assert_eq!(view.primary, Some(old_backup));
    assert!(view.backup.is_some());
    assert_ne!(view.backup, Some(old_primary));

    client.shutdown().await?;
    cluster.shutdown().await
}
