//! Paxlab cluster simulation driver.
//!
//! Spawns a cluster of the chosen protocol on a simulated lossy network,
//! runs a closed-loop key-value workload from every client, and checks each
//! result against what the client itself expects.

use std::process::ExitCode;

use clap::Parser;
use futures::future;
use log::{self, LevelFilter};
use rand::Rng;
use tokio::runtime::Builder;
use tokio::time::Duration;

use paxlab::paxos::{PaxosClient, PaxosServer};
use paxlab::primarybackup::{PbClient, PbServer, ViewServer};
use paxlab::{
    logged_err, logger_init, pf_error, pf_info, Address, ClientHandle,
    GenericClient, KvCommand, KvResult, KvStore, Network, NetworkConfig,
    NodeHandle, PaxlabError, Protocol,
};

/// Per-command result wait limit.
const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Name of replication protocol to use.
    #[arg(short, long)]
    protocol: String,

    /// Number of server replicas.
    #[arg(short = 'n', long, default_value_t = 3)]
    servers: u8,

    /// Number of concurrent clients.
    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    /// Number of operations issued by each client.
    #[arg(short, long, default_value_t = 50)]
    ops: usize,

    /// Probability of dropping a message.
    #[arg(short, long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Server configuration TOML string.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(protocol)` on success
    /// or `Err(PaxlabError)` on any error.
    fn sanitize(&self) -> Result<Protocol, PaxlabError> {
        if self.servers == 0 || self.servers == u8::MAX {
            Err(PaxlabError::msg(format!(
                "invalid number of servers {}",
                self.servers
            )))
        } else if self.clients == 0 {
            Err(PaxlabError::msg(format!(
                "invalid number of clients {}",
                self.clients
            )))
        } else if !(0.0..1.0).contains(&self.drop_rate) {
            Err(PaxlabError::msg(format!(
                "invalid drop rate {}",
                self.drop_rate
            )))
        } else if self.threads < 2 {
            Err(PaxlabError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Protocol::parse_name(&self.protocol).ok_or(PaxlabError::msg(
                format!("protocol name '{}' unrecognized", self.protocol),
            ))
        }
    }

    fn config_str(&self) -> Option<&str> {
        if self.config.is_empty() {
            None
        } else {
            Some(&self.config)
        }
    }
}

/// Pre-generates a client's workload: every client owns one key, so that
/// it can predict every result on its own.
fn gen_workload(client: usize, ops: usize) -> Vec<KvCommand> {
    let mut rng = rand::thread_rng();
    let key = format!("key{}", client);
    (0..ops)
        .map(|i| match rng.gen_range(0..4) {
            0 => KvCommand::Get { key: key.clone() },
            1 => KvCommand::Put {
                key: key.clone(),
                value: format!("p{}", i),
            },
            _ => KvCommand::Append {
                key: key.clone(),
                value: format!("a{};", i),
            },
        })
        .collect()
}

/// Runs a workload through one client and checks every result. Returns
/// the number of operations completed.
async fn drive_client<C>(
    mut handle: ClientHandle<C>,
    workload: Vec<KvCommand>,
) -> Result<usize, PaxlabError>
where
    C: GenericClient<Command = KvCommand, Result = KvResult>,
{
    let mut expected: Option<String> = None;
    let mut done = 0;
    for cmd in workload {
        handle.send_command(cmd.clone()).await?;
        let result = handle.get_result_timeout(RESULT_TIMEOUT).await?;

        let want = match cmd {
            KvCommand::Get { .. } => match &expected {
                Some(value) => KvResult::GetResult {
                    value: value.clone(),
                },
                None => KvResult::KeyNotFound,
            },
            KvCommand::Put { value, .. } => {
                expected = Some(value);
                KvResult::PutOk
            }
            KvCommand::Append { value, .. } => {
                let value = expected.take().unwrap_or_default() + &value;
                expected = Some(value.clone());
                KvResult::AppendResult { value }
            }
        };
        if result != want {
            return logged_err!(handle.address();
                               "result mismatch: got {:?} want {:?}",
                               result, want);
        }
        done += 1;
    }

    handle.shutdown().await?;
    Ok(done)
}

/// Runs all clients concurrently; returns total operations completed.
async fn drive_clients<C>(
    handles: Vec<ClientHandle<C>>,
    ops: usize,
) -> Result<usize, PaxlabError>
where
    C: GenericClient<Command = KvCommand, Result = KvResult>,
{
    let workloads: Vec<Vec<KvCommand>> =
        (0..handles.len()).map(|c| gen_workload(c, ops)).collect();
    let drivers = handles
        .into_iter()
        .zip(workloads)
        .map(|(handle, workload)| drive_client(handle, workload));
    let done = future::try_join_all(drivers).await?;
    Ok(done.into_iter().sum())
}

/// Simulates a Paxos cluster.
async fn run_paxos(
    args: &CliArgs,
    network: NetworkConfig,
) -> Result<(), PaxlabError> {
    let net = Network::new(network)?;
    let servers: Vec<Address> =
        (0..args.servers as usize).map(Address::server).collect();

    let mut server_handles = Vec::with_capacity(servers.len());
    for addr in &servers {
        let server = PaxosServer::new_and_setup(
            addr.clone(),
            servers.clone(),
            KvStore::new(),
            args.config_str(),
        )?;
        server_handles.push(NodeHandle::spawn(server, net.clone())?);
    }

    let mut client_handles = Vec::with_capacity(args.clients);
    for c in 0..args.clients {
        let client = PaxosClient::<KvStore>::new_and_setup(
            Address::client(c),
            servers.clone(),
            None,
        )?;
        client_handles.push(ClientHandle::spawn(client, net.clone())?);
    }

    let done = drive_clients(client_handles, args.ops).await?;
    pf_info!("paxos: {} operations completed", done);

    for handle in server_handles {
        let exec_bar = handle.inspect(|s| s.exec_bar()).await?;
        pf_info!(handle.address(); "executed up to slot {}", exec_bar - 1);
        handle.shutdown().await?;
    }
    Ok(())
}

/// Simulates a primary-backup cluster.
async fn run_primarybackup(
    args: &CliArgs,
    network: NetworkConfig,
) -> Result<(), PaxlabError> {
    let net = Network::new(network)?;
    let vs_addr = Address::view_server();

    let view_server =
        ViewServer::<KvStore>::new_and_setup(vs_addr.clone(), None)?;
    let vs_handle = NodeHandle::spawn(view_server, net.clone())?;

    let mut server_handles = Vec::with_capacity(args.servers as usize);
    for s in 0..args.servers as usize {
        let server = PbServer::new_and_setup(
            Address::server(s),
            vs_addr.clone(),
            KvStore::new(),
            args.config_str(),
        )?;
        server_handles.push(NodeHandle::spawn(server, net.clone())?);
    }

    let mut client_handles = Vec::with_capacity(args.clients);
    for c in 0..args.clients {
        let client = PbClient::<KvStore>::new_and_setup(
            Address::client(c),
            vs_addr.clone(),
            None,
        )?;
        client_handles.push(ClientHandle::spawn(client, net.clone())?);
    }

    let done = drive_clients(client_handles, args.ops).await?;
    let view = vs_handle.inspect(|vs| vs.view().clone()).await?;
    pf_info!("primarybackup: {} operations completed in view {}", done, view);

    for handle in server_handles {
        handle.shutdown().await?;
    }
    vs_handle.shutdown().await?;
    Ok(())
}

/// Actual main function of the simulation driver.
fn sim_main() -> Result<(), PaxlabError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let protocol = args.sanitize()?;
    let network = NetworkConfig {
        drop_rate: args.drop_rate,
        ..Default::default()
    };

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-sim")
            .build()?;

        runtime.block_on(async {
            match protocol {
                Protocol::Paxos => run_paxos(&args, network).await?,
                Protocol::PrimaryBackup => {
                    run_primarybackup(&args, network).await?
                }
            }

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), PaxlabError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the simulation driver.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = sim_main() {
        pf_error!("sim_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn valid_args() -> CliArgs {
        CliArgs {
            protocol: "Paxos".into(),
            servers: 3,
            clients: 2,
            ops: 10,
            drop_rate: 0.1,
            config: String::new(),
            threads: 2,
        }
    }

    #[test]
    fn sanitize_valid() -> Result<(), PaxlabError> {
        assert_eq!(valid_args().sanitize(), Ok(Protocol::Paxos));
        let args = CliArgs {
            protocol: "PrimaryBackup".into(),
            ..valid_args()
        };
        assert_eq!(args.sanitize()?, Protocol::PrimaryBackup);
        Ok(())
    }

    #[test]
    fn sanitize_invalid_servers() {
        let args = CliArgs {
            servers: 0,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_clients() {
        let args = CliArgs {
            clients: 0,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_drop_rate() {
        let args = CliArgs {
            drop_rate: 1.0,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_protocol() {
        let args = CliArgs {
            protocol: "InvalidProtocol".into(),
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let args = CliArgs {
            threads: 1,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn workload_single_key() {
        let workload = gen_workload(3, 20);
        assert_eq!(workload.len(), 20);
        assert!(workload.iter().all(|cmd| match cmd {
            KvCommand::Get { key }
            | KvCommand::Put { key, .. }
            | KvCommand::Append { key, .. } => key == "key3",
        }));
    }

    #[test]
    fn config_str_empty_is_none() {
        assert_eq!(valid_args().config_str(), None);
        let args = CliArgs {
            config: "heartbeat_interval_ms = 50".into(),
            ..valid_args()
        };
        assert_eq!(args.config_str(), Some("heartbeat_interval_ms = 50"));
    }
}
