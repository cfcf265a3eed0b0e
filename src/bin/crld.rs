extern crate crld;

use crld::config::Config;
use crld::server;

fn main() {
    match Config::create() {
        Ok(config) => {
            if let Err(e) = server::start(&config) {
                eprintln!("crld failed: {}", e);
                ::std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        }
    }
}
