fn main() {
    println!("Tac-Net - networked Tic-Tac-Toe server");
    println!();
    println!("Usage:");
    println!("  Start the server:   cargo run --bin server -- -p 7878");
    println!("  Connect a client:   cargo run --bin client -- 127.0.0.1:7878");
    println!();
    println!("Run `server --help` for the full set of flags.");
}
