//! Paxos clusters running on the tokio runtime over the simulated network.

use paxlab::paxos::{PaxosClient, PaxosMsg, PaxosServer};
use paxlab::{
    Address, ClientHandle, KvCommand, KvResult, KvStore, Network,
    NetworkConfig, NodeHandle, PaxlabError,
};

use futures::future;

use tokio::time::{self, Duration, Instant};

type Net = Network<PaxosMsg<KvCommand, KvResult>>;
type Server = NodeHandle<PaxosServer<KvStore>>;
type Client = ClientHandle<PaxosClient<KvStore>>;

const WAIT: Duration = Duration::from_secs(10);

fn spawn_servers(net: &Net, n: usize) -> Result<Vec<Server>, PaxlabError> {
    let addrs: Vec<Address> = (0..n).map(Address::server).collect();
    addrs
        .iter()
        .map(|a| {
            let server = PaxosServer::new_and_setup(
                a.clone(),
                addrs.clone(),
                KvStore::new(),
                Some("heartbeat_interval_ms = 20"),
            )?;
            NodeHandle::spawn(server, net.clone())
        })
        .collect()
}

fn spawn_client(
    net: &Net,
    idx: usize,
    n: usize,
) -> Result<Client, PaxlabError> {
    let client = PaxosClient::new_and_setup(
        Address::client(idx),
        (0..n).map(Address::server).collect(),
        Some("resend_interval_ms = 50"),
    )?;
    ClientHandle::spawn(client, net.clone())
}

fn put(key: &str, value: &str) -> KvCommand {
    KvCommand::Put {
        key: key.into(),
        value: value.into(),
    }
}

fn append(key: &str, value: &str) -> KvCommand {
    KvCommand::Append {
        key: key.into(),
        value: value.into(),
    }
}

fn get(key: &str) -> KvCommand {
    KvCommand::Get { key: key.into() }
}

async fn call(
    client: &mut Client,
    cmd: KvCommand,
) -> Result<KvResult, PaxlabError> {
    client.send_command(cmd).await?;
    client.get_result_timeout(WAIT).await
}

/// Issues appends to the client's own key and checks every result.
async fn append_run(
    mut client: Client,
    key: String,
    ops: usize,
) -> Result<Client, PaxlabError> {
    let mut expected = String::new();
    for i in 0..ops {
        let piece = format!("{}.{};", key, i);
        expected.push_str(&piece);
        let result = call(&mut client, append(&key, &piece)).await?;
        assert_eq!(
            result,
            KvResult::AppendResult {
                value: expected.clone()
            }
        );
    }
    Ok(client)
}

/// Waits until every server has executed the same prefix into the same
/// store state.
async fn wait_converged(servers: &[Server]) -> Result<KvStore, PaxlabError> {
    let deadline = Instant::now() + WAIT;
    loop {
        let mut states = Vec::with_capacity(servers.len());
        for s in servers {
            states.push(s.inspect(|s| (s.exec_bar(), s.app().clone())).await?);
        }
        if states.windows(2).all(|w| w[0] == w[1]) {
            return Ok(states.swap_remove(0).1);
        }
        if Instant::now() > deadline {
            return Err(PaxlabError::msg(format!(
                "servers not converged: {:?}",
                states.iter().map(|(bar, _)| bar).collect::<Vec<_>>()
            )));
        }
        time::sleep(Duration::from_millis(20)).await;
    }
}

async fn shutdown_all(servers: Vec<Server>) -> Result<(), PaxlabError> {
    for s in servers {
        s.shutdown().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reliable_basic_ops() -> Result<(), PaxlabError> {
    let net = Net::reliable();
    let servers = spawn_servers(&net, 3)?;
    let mut client = spawn_client(&net, 0, 3)?;

    assert_eq!(call(&mut client, get("foo")).await?, KvResult::KeyNotFound);
    assert_eq!(call(&mut client, put("foo", "bar")).await?, KvResult::PutOk);
    assert_eq!(
        call(&mut client, append("foo", "baz")).await?,
        KvResult::AppendResult {
            value: "barbaz".into()
        }
    );
    assert!(client.has_result());
    assert_eq!(
        call(&mut client, get("foo")).await?,
        KvResult::GetResult {
            value: "barbaz".into()
        }
    );

    let store = wait_converged(&servers).await?;
    assert_eq!(store.len(), 1);
    client.shutdown().await?;
    shutdown_all(servers).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lossy_concurrent_clients() -> Result<(), PaxlabError> {
    let net = Net::new(NetworkConfig {
        drop_rate: 0.2,
        dup_rate: 0.1,
        delay_min_ms: 0,
        delay_max_ms: 5,
    })?;
    let servers = spawn_servers(&net, 5)?;
    let clients = (0..3)
        .map(|c| spawn_client(&net, c, 5))
        .collect::<Result<Vec<_>, _>>()?;

    let runs = clients
        .into_iter()
        .enumerate()
        .map(|(c, client)| append_run(client, format!("k{}", c), 8));
    let clients = future::try_join_all(runs).await?;

    // stop injecting faults so that every server catches up
    net.set_config(NetworkConfig::default())?;
    let store = wait_converged(&servers).await?;
    assert_eq!(store.len(), 3);

    for client in clients {
        client.shutdown().await?;
    }
    shutdown_all(servers).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_needs_majority() -> Result<(), PaxlabError> {
    let net = Net::reliable();
    let servers = spawn_servers(&net, 5)?;
    let mut client = spawn_client(&net, 0, 5)?;

    net.disconnect(&Address::server(3));
    net.disconnect(&Address::server(4));
    assert_eq!(call(&mut client, put("x", "1")).await?, KvResult::PutOk);

    // two of five left: nothing can be decided
    net.disconnect(&Address::server(2));
    client.send_command(append("x", "2")).await?;
    assert!(client
        .get_result_timeout(Duration::from_millis(500))
        .await
        .is_err());
    assert!(!client.has_result());

    net.reconnect(&Address::server(2));
    assert_eq!(
        client.get_result_timeout(WAIT).await?,
        KvResult::AppendResult { value: "12".into() }
    );

    client.shutdown().await?;
    shutdown_all(servers).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnected_server_catches_up() -> Result<(), PaxlabError> {
    let net = Net::reliable();
    let servers = spawn_servers(&net, 3)?;
    let client = spawn_client(&net, 0, 3)?;

    net.disconnect(&Address::server(2));
    let client = append_run(client, "k".into(), 6).await?;
    let lagging = servers[2].inspect(|s| s.exec_bar()).await?;
    assert_eq!(lagging, 1);
    // nothing is collected while a server lags behind
    assert_eq!(servers[0].inspect(|s| s.first_non_cleared()).await?, 1);

    net.reconnect(&Address::server(2));
    let store = wait_converged(&servers).await?;
    assert_eq!(store, servers[2].inspect(|s| s.app().clone()).await?);

    client.shutdown().await?;
    shutdown_all(servers).await
}
