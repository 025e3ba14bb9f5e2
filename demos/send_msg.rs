//! Client node demo.
//!
//! Joins the cluster as a hidden node, looks up `--destination` on
//! `--peer`, and sends it a single message before exiting. A translation
//! of the original crate's hand-wired `send_msg.rs` example onto the
//! [`erl_node_rt::Node`] runtime: EPMD lookup, handshake, and connection
//! caching are handled by the node itself rather than by this binary.
//!
//! ```bash
//! $ cargo run --example send_msg -- --peer foo@localhost --destination foo --cookie erlang_cookie -m hello
//! ```

use std::time::Duration;

use clap::Parser;
use erl_node_rt::node::Node;
use erl_node_rt::term::{Atom, Term};

#[derive(Debug, Parser)]
#[clap(name = "send_msg")]
struct Args {
    #[clap(long = "peer", default_value = "foo@localhost")]
    peer_name: String,

    #[clap(long, default_value = "WPKYDIOSJIMJUURLRUHV")]
    cookie: String,

    #[clap(long = "self", default_value = "bar@localhost")]
    self_node: String,

    #[clap(long, short, default_value = "foo")]
    destination: String,

    #[clap(long, short, default_value = "hello_world")]
    message: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let self_node: erl_node_rt::NodeName = args.self_node.parse()?;
    let peer_node: erl_node_rt::NodeName = args.peer_name.parse()?;
    let cookie = Atom::new(&args.cookie)?;

    let node = Node::start(self_node, cookie, "0.0.0.0", true)?;
    println!("# Started: {:?}, listening on port {}", node.name(), node.listen_port());

    let mbox = node.create_mbox(None, true)?;
    let destination = Atom::new(&args.destination)?;
    let payload = Term::atom(&args.message)?;
    println!("# Send: {:?} ! {:?}", destination, payload);
    mbox.send_to_name(destination, peer_node, payload)?;

    // Give the control message a moment to flush before tearing the
    // connection down.
    std::thread::sleep(Duration::from_millis(200));
    node.close();
    println!("# DONE");
    Ok(())
}
