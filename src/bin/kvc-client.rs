//! The kvc-client executable runs single operations against a key-value storage device:
//!
//! `kvc-client put <KEY> <VALUE> [--addr IP-PORT]`
//!
//!     Store the value of a string key on the device.
//!     --addr accepts an IP address, either v4 or v6, and a port number, with the format IP:PORT. If --addr is not specified then connect on 127.0.0.1:8123.
//!     Print an error and return a non-zero exit code on device error, or if IP-PORT does not parse as an address.
//!
//! `kvc-client get <KEY> [--addr IP-PORT]`
//!
//!     Get the string value of a given string key.
//!
//! `kvc-client rm <KEY> [--addr IP-PORT]`
//!
//!     Delete a given key from the device.
//!
//! `kvc-client range <START> <END> [--max N] [--addr IP-PORT]`
//!
//!     List up to N keys in the inclusive range [START, END].
//!
//! `kvc-client noop [--addr IP-PORT]`
//!
//!     Round trip a no-op through the device, as a health check.
//!
//! `kvc-client -V`
//!
//!     Print the version.

use std::net::SocketAddr;

use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use kvc::{KvcClient, KvcError, Request, Result, TaskPoolConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:8123";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the device's ip:port
    addr: SocketAddr,
    req: Request,
}

impl Opt {
    fn new(addr: SocketAddr, req: Request) -> Self {
        Self { addr, req }
    }

    /// validates the `addr` parameter is a valid IP address and PORT
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`KvcError::Parsing`] if one of the parameters is invalid
    ///
    fn build(addr: &str, req: Request) -> Result<Opt> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| KvcError::Parsing(format!("could not parse {} into an IP address and port", &addr)))?;

        Ok(Opt::new(addr, req))
    }
}

fn main() -> Result<()> {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("kvc-client")
        .version(crate_version!())
        .about("a client for networked key-value storage devices")
        .subcommands(vec![
            SubCommand::with_name("put")
                .about("Store the value of a string key on the device")
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).index(2)),
            SubCommand::with_name("get")
                .about("Get the string value of a given string key")
                .arg(Arg::with_name("KEY").required(true).index(1)),
            SubCommand::with_name("rm")
                .about("Deletes a given key from the device")
                .arg(Arg::with_name("KEY").required(true).index(1)),
            SubCommand::with_name("range")
                .about("List the keys within an inclusive key range")
                .arg(Arg::with_name("START").required(true).index(1))
                .arg(Arg::with_name("END").required(true).index(2))
                .arg(
                    Arg::with_name("max")
                        .long("max")
                        .value_name("N")
                        .help("maximum number of keys to list")
                        .default_value("200"),
                ),
            SubCommand::with_name("noop").about("Round trip a no-op through the device"),
        ])
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT of the device to connect to")
                .default_value(DEFAULT_ADDRESS),
        )
        .get_matches();

    // parse commands into an Opt struct
    match parse_options(matches) {
        Ok(opt) => run(opt),
        Err(e) => Err(e),
    }
}

/// runs the specified request on a [`KvcClient`]
/// `opt` contains the device address and the request type to execute
fn run(opt: Opt) -> Result<()> {
    let client = KvcClient::connect(opt.addr, TaskPoolConfig::default())?;
    match opt.req {
        Request::Put { key, value } => {
            client.put(key, value)?;
        }
        Request::Get { key } => {
            if let Some(value) = client.get(key)? {
                println!("{}", value);
            } else {
                println!("Key not found");
            }
        }
        Request::Delete { key } => {
            client.delete(key)?;
        }
        Request::GetKeyRange { start, end, max } => {
            for key in client.get_key_range(start, end, max)? {
                println!("{}", key);
            }
        }
        Request::Noop => {
            client.noop()?;
        }
    }
    Ok(())
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: ArgMatches) -> Result<Opt> {
    let addr = matches.value_of("addr").unwrap();
    match matches.subcommand() {
        ("put", Some(args)) => {
            let key = args.value_of("KEY").map(String::from).unwrap();
            let value = args.value_of("VALUE").map(String::from).unwrap();
            Opt::build(addr, Request::Put { key, value })
        }
        ("get", Some(args)) => {
            let key = args.value_of("KEY").map(String::from).unwrap();
            Opt::build(addr, Request::Get { key })
        }
        ("rm", Some(args)) => {
            let key = args.value_of("KEY").map(String::from).unwrap();
            Opt::build(addr, Request::Delete { key })
        }
        ("range", Some(args)) => {
            let start = args.value_of("START").map(String::from).unwrap();
            let end = args.value_of("END").map(String::from).unwrap();
            let max = args
                .value_of("max")
                .unwrap()
                .parse::<usize>()
                .map_err(|_| KvcError::Parsing("--max must be a number".to_string()))?;
            Opt::build(addr, Request::GetKeyRange { start, end, max })
        }
        ("noop", Some(_)) => Opt::build(addr, Request::Noop),
        _ => panic!("unknown command received"),
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::WARN)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
