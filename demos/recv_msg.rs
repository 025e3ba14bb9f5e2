//! Server node demo.
//!
//! Registers `--register` under the EPMD and waits for messages sent to
//! it from other connected nodes, printing and discarding each one. A
//! translation of the original crate's hand-wired `recv_msg.rs` example
//! onto the [`erl_node_rt::Node`] runtime: accept loop, handshake, and
//! tick/tock keepalive are all handled inside the node itself.
//!
//! ```bash
//! $ cargo run --example recv_msg -- --local bar@localhost --cookie erlang_cookie
//!
//! # On another shell:
//! $ erl -sname foo
//! > {bar, bar@localhost} ! hello.
//! ```

use clap::Parser;
use erl_node_rt::node::Node;
use erl_node_rt::term::Atom;

#[derive(Debug, Parser)]
#[clap(name = "recv_msg")]
struct Args {
    #[clap(long = "local", default_value = "bar@localhost")]
    local_node: String,

    #[clap(long, default_value = "WPKYDIOSJIMJUURLRUHV")]
    cookie: String,

    /// Name registered with the local EPMD for other nodes to address
    /// messages to (`{name, node} ! message`).
    #[clap(long, default_value = "bar")]
    register: String,

    /// Add the `PUBLISHED` distribution flag (otherwise the node runs hidden).
    #[clap(long)]
    published: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let local_node: erl_node_rt::NodeName = args.local_node.parse()?;
    let cookie = Atom::new(&args.cookie)?;
    let name = Atom::new(&args.register)?;

    let node = Node::start(local_node, cookie, "0.0.0.0", !args.published)?;
    println!("Listening port: {}", node.listen_port());

    let mbox = node.create_mbox(Some(name), true)?;
    println!("Registered self node as {:?}", node.name());

    loop {
        match mbox.receive() {
            Ok(received) => println!("Recv: {:?} -> {:?}", received.from, received.message),
            Err(erl_node_rt::MailboxError::Closed) => {
                println!("mailbox closed, exiting");
                break;
            }
            Err(e) => println!("Error: {}", e),
        }
    }

    node.close();
    Ok(())
}
