use burrow::crypto::Fernet;
use clap::Parser;

/// Print a fresh pre-shared key for burrow-client and burrow-gateway.
#[derive(Parser, Debug)]
#[command(name = "burrow-keygen", version)]
struct Args {}

fn main() {
    let _ = Args::parse();
    println!("{}", Fernet::generate_key());
}
