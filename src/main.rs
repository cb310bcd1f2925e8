use std::path::Path;

use mio::Poll;
use origin_server::config::Config;
use origin_server::error::Result;
use origin_server::server::Server;

fn main() -> Result<()> {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "origin_server".to_string());
    let config_path = match (args.next(), args.next()) {
        (Some(path), None) => path,
        _ => {
            eprintln!("usage: {} <config-file>", program);
            std::process::exit(2);
        }
    };

    let config = Config::load(Path::new(&config_path))?;
    let poll = Poll::new()?;
    let mut server = Server::new(config, &poll)?;
    server.run(poll)
}
