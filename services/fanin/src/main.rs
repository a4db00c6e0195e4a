use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command};
use skein::config::NodeConfig;
use skein::contract::{ServiceKind, Transport};
use skein::logging;
use std::process::exit;
use std::time::Duration;
use weft::context;
use weft::name::ChannelName;
use weft::registry::{self, RegistryProxy};
use weft::roles::{self, FilterContext};

const ROLE: &str = "filter";
const DEFAULT_NODE_NAME: &str = "fanin";
const DESCRIPTION: &str = "Merges the values arriving on several input channels onto one output channel.";

fn command() -> Command {
    Command::new("fanin")
        .about(DESCRIPTION)
        .arg(
            Arg::new("vers")
                .short('v')
                .long("vers")
                .action(ArgAction::SetTrue)
                .help("Print the version and exit"),
        )
        .arg(
            Arg::new("args")
                .short('a')
                .long("args")
                .action(ArgAction::SetTrue)
                .help("Print the argument format descriptors and exit"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("Print the role, supported options and description, then exit"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("detail")
                .short('d')
                .long("detail")
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .long("log")
                .action(ArgAction::SetTrue)
                .help("Enable logging of channel activity"),
        )
        .arg(
            Arg::new("node")
                .short('n')
                .long("node")
                .value_name("NAME")
                .help("Override the node name"),
        )
        .arg(
            Arg::new("tag")
                .short('t')
                .long("tag")
                .value_name("TAG")
                .help("Tag appended to the node name"),
        )
        .arg(Arg::new("base").value_name("BASE_PATH").help("Base path for the channels"))
        .arg(
            Arg::new("count")
                .value_name("COUNT")
                .default_value("2")
                .help("Number of input channels"),
        )
}

fn run() -> i32 {
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(error) if error.kind() == ErrorKind::DisplayHelp => {
            let _ = error.print();
            return 0;
        }
        Err(error) => {
            let _ = error.print();
            return 1;
        }
    };

    if matches.get_flag("vers") {
        println!("fanin {}", env!("CARGO_PKG_VERSION"));
        return 0;
    }
    if matches.get_flag("args") {
        println!("s\tbase channel path\ni\tnumber of input channels");
        return 0;
    }
    if matches.get_flag("info") {
        println!("{}\t-c -d -l -n -t\t{}", ROLE, DESCRIPTION);
        return 0;
    }

    let config = NodeConfig::load_or_default(matches.get_one::<String>("config").map(String::as_str));
    let log = logging::init(matches.get_flag("detail") || config.node.verbose);
    let node_name = roles::construct_node_name(
        matches.get_one::<String>("node").map(String::as_str),
        DEFAULT_NODE_NAME,
        matches.get_one::<String>("tag").map(String::as_str),
    );
    let base_path = matches.get_one::<String>("base").cloned().unwrap_or_default();
    let channel_count: usize = match matches.get_one::<String>("count").map(String::as_str).unwrap_or("2").parse() {
        Ok(count) if count > 0 => count,
        _ => {
            eprintln!("Invalid channel count");
            return 1;
        }
    };

    context::install_signal_handlers(&log);

    let mut filter = match FilterContext::new(&node_name, channel_count, 1, matches.get_flag("log"), &log) {
        Ok(filter) => filter,
        Err(error) => {
            logging::error!(log, "cannot create node context"; "error" => format!("{:?}", error));
            return 1;
        }
    };

    let connection = match registry::find_registry(&config) {
        Some(connection) => connection,
        None => {
            filter.report("Registry not found.");
            eprintln!("Registry not found.");
            return 2;
        }
    };
    let mut proxy = match RegistryProxy::connect(&connection, Duration::from_millis(config.registry.timeout_ms), &log)
    {
        Ok(proxy) => proxy,
        Err(_) => {
            eprintln!("Registry not found.");
            return 2;
        }
    };

    let (status, present) = proxy.is_node_present(&node_name);
    if !status.success {
        eprintln!("Problem with 'is_node_present': {}", status.detail);
        return 1;
    }
    if present {
        filter.report(&format!("{} already running.", node_name));
        eprintln!("{} already running.", node_name);
        return 1;
    }

    let launch_args: Vec<String> = std::env::args().collect();
    let (status, added) = proxy.add_node(
        &node_name,
        &launch_args,
        ServiceKind::FilterService,
        &filter.command_connection(),
    );
    if !status.success {
        eprintln!("Problem with 'add_node': {}", status.detail);
        return 1;
    }
    if !added {
        filter.report(&format!("{} already registered.", node_name));
        eprintln!("{} already registered.", node_name);
        return 1;
    }

    let mut exit_code = 0;
    let mut registered_outputs = Vec::new();
    let mut registered_inputs = Vec::new();
    let mut out_path = String::new();

    if ChannelName::generate_path(&base_path, true, 1, 1, &mut out_path) {
        let (status, added) = proxy.add_channel(&node_name, &out_path, true, "", Transport::Any);

        if !status.success {
            eprintln!("Problem with 'add_channel': {}", status.detail);
            exit_code = 1;
        } else if !added {
            filter.report(&format!("{} already registered.", out_path));
            eprintln!("{} already registered.", out_path);
            exit_code = 1;
        } else if filter.add_output_channel(&out_path, Transport::Any).is_ok() {
            registered_outputs.push(out_path.clone());
        } else {
            eprintln!("Cannot create output channel {}", out_path);
            exit_code = 1;
        }
    } else {
        eprintln!("Invalid channel path '{}'", base_path);
        exit_code = 1;
    }

    // One greater than the requested channel count, so every input path
    // ends in a number.
    for index in 1..=channel_count {
        if exit_code != 0 {
            break;
        }

        let mut in_path = String::new();

        if ChannelName::generate_path(&base_path, false, channel_count + 1, index, &mut in_path) {
            let (status, added) = proxy.add_channel(&node_name, &in_path, false, "", Transport::Any);

            if !status.success {
                eprintln!("Problem with 'add_channel': {}", status.detail);
                exit_code = 1;
            } else if !added {
                filter.report(&format!("{} already registered.", in_path));
                eprintln!("{} already registered.", in_path);
                exit_code = 1;
            } else if filter.add_input_channel(&in_path, Transport::Any).is_ok() {
                registered_inputs.push(in_path);
            } else {
                eprintln!("Cannot create input channel {}", in_path);
                exit_code = 1;
            }
        } else {
            eprintln!("Invalid channel path '{}'", base_path);
            exit_code = 1;
        }
    }

    if exit_code == 0 {
        filter.report("waiting for requests.");
        while context::keep_running() {
            filter.yield_io();
            if let Some(message) = filter.next_message_timeout(Duration::from_millis(10)) {
                if !context::keep_running() {
                    break;
                }
                if !filter.send(&out_path, &message.value) {
                    exit_code = 1;
                    break;
                }
            }
        }
    }

    let teardown_code = roles::deregister_node(&mut proxy, &mut filter, &registered_outputs, &registered_inputs);

    if exit_code == 0 {
        exit_code = teardown_code;
    }
    filter.report("exiting.");

    exit_code
}

fn main() {
    match std::panic::catch_unwind(run) {
        Ok(code) => exit(code),
        Err(_) => exit(-1),
    }
}
