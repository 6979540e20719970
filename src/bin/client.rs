use std::fmt;

use clap::{ArgAction, Parser};
use tac_net::codec::{self, Header, PacketType, Role};
use tac_net::logger::Logger;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(
    name = "client",
    version,
    about = "Tac-Net — terminal client",
    long_about = "Connects to a running Tac-Net server and plays interactively.\n\
                  Commands:\n  \
                    login <name>\n  \
                    users\n  \
                    invite <name> <X|O>        (role the target plays)\n  \
                    accept <id>\n  decline <id>\n  revoke <id>\n  \
                    move <id> <cell><X|O>\n  resign <id>\n  quit"
)]
struct Args {
    /// Server address to connect to
    #[arg(default_value = "127.0.0.1:7878")]
    addr: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            print!("{err}");
            std::process::exit(err.exit_code());
        }
    }
}

enum ClientEvent<'a> {
    Connecting { addr: &'a str },
    Connected { addr: &'a str },
    Sending { kind: PacketType, id: u8 },
    Disconnected,
}

impl fmt::Display for ClientEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connecting { addr } => write!(f, "Connecting to {addr}…"),
            ClientEvent::Connected { addr } => write!(f, "Connected to {addr}"),
            ClientEvent::Sending { kind, id } => write!(f, "→ {kind:?} id={id}"),
            ClientEvent::Disconnected => write!(f, "Connection closed by server"),
        }
    }
}

fn print_help() {
    println!("  Commands:");
    println!("    login <name>");
    println!("    users");
    println!("    invite <name> <X|O>          invite <name>, who plays the given piece");
    println!("    accept <id> | decline <id> | revoke <id> | resign <id>");
    println!("    move <id> <cell><X|O>        e.g. move 0 5X");
    println!("    quit");
}

fn print_prompt() {
    use std::io::Write as _;
    print!("> ");
    std::io::stdout().flush().ok();
}

fn describe_notification(header: &Header, payload: &[u8]) {
    let kind = PacketType::from_wire(header.kind);
    let text = String::from_utf8_lossy(payload);
    match kind {
        Some(PacketType::Ack) => {
            if payload.is_empty() {
                println!("OK (id={})", header.id);
            } else {
                println!("OK (id={}): {text}", header.id);
            }
        }
        Some(PacketType::Nack) => println!("REJECTED (id={})", header.id),
        Some(PacketType::Invited) => {
            let role = Role::from_wire(header.role).unwrap_or(Role::None);
            println!("invitation {} from {text} — you play {role:?}", header.id);
        }
        Some(PacketType::Revoked) => println!("invitation {} was revoked", header.id),
        Some(PacketType::Declined) => println!("invitation {} was declined", header.id),
        Some(PacketType::Accepted) => {
            println!("invitation {} accepted", header.id);
            if !payload.is_empty() {
                println!("{text}");
            }
        }
        Some(PacketType::Moved) => println!("game {}: {text}", header.id),
        Some(PacketType::Resigned) => println!("game {}: opponent resigned", header.id),
        Some(PacketType::Ended) => {
            let role = Role::from_wire(header.role).unwrap_or(Role::None);
            println!("game {} ended — winner: {role:?}", header.id);
        }
        _ => println!("(unrecognised packet type {})", header.kind),
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();
    let log = Logger::new(args.verbose);

    log.info(ClientEvent::Connecting { addr: &args.addr });
    let stream = match TcpStream::connect(&args.addr).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect to {}: {e}", args.addr);
            std::process::exit(1);
        }
    };
    log.info(ClientEvent::Connected { addr: &args.addr });
    print_help();

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    print_prompt();
    loop {
        tokio::select! {
            frame = codec::recv(&mut reader) => {
                match frame {
                    Ok(Some((header, payload))) => {
                        println!();
                        describe_notification(&header, &payload);
                        print_prompt();
                    }
                    Ok(None) | Err(_) => {
                        log.info(ClientEvent::Disconnected);
                        println!("\nDisconnected from server.");
                        break;
                    }
                }
            }

            line = stdin_lines.next_line() => {
                let raw = match line {
                    Ok(Some(l)) => l,
                    _ => {
                        println!("\nInput closed.");
                        break;
                    }
                };
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    print_prompt();
                    continue;
                }
                if trimmed.eq_ignore_ascii_case("quit") {
                    break;
                }

                let send_result = match parse_command(trimmed) {
                    Ok((kind, id, role, payload)) => {
                        log.verbose(ClientEvent::Sending { kind, id });
                        let header = Header::new(kind, id, role, payload.len() as u16);
                        codec::send(&mut writer, &header, &payload).await
                    }
                    Err(msg) => {
                        println!("  ? {msg}");
                        print_help();
                        print_prompt();
                        continue;
                    }
                };

                if let Err(err) = send_result {
                    eprintln!("Failed to send command: {err}");
                    break;
                }
                print_prompt();
            }
        }
    }
}

/// Parses one typed line into (packet type, id, role, payload).
fn parse_command(line: &str) -> Result<(PacketType, u8, Role, Vec<u8>), String> {
    let mut t = line.split_whitespace();
    let cmd = t.next().unwrap_or("").to_ascii_lowercase();
    match cmd.as_str() {
        "login" => {
            let name = t.next().ok_or("usage: login <name>")?;
            Ok((PacketType::Login, 0, Role::None, name.as_bytes().to_vec()))
        }
        "users" => Ok((PacketType::Users, 0, Role::None, Vec::new())),
        "invite" => {
            let name = t.next().ok_or("usage: invite <name> <X|O>")?;
            let piece = t.next().ok_or("usage: invite <name> <X|O>")?;
            let role = match piece.to_ascii_uppercase().as_str() {
                "X" => Role::First,
                "O" => Role::Second,
                _ => return Err("role must be X or O".into()),
            };
            Ok((PacketType::Invite, 0, role, name.as_bytes().to_vec()))
        }
        "accept" => Ok((PacketType::Accept, parse_id(&mut t)?, Role::None, Vec::new())),
        "decline" => Ok((PacketType::Decline, parse_id(&mut t)?, Role::None, Vec::new())),
        "revoke" => Ok((PacketType::Revoke, parse_id(&mut t)?, Role::None, Vec::new())),
        "resign" => Ok((PacketType::Resign, parse_id(&mut t)?, Role::None, Vec::new())),
        "move" => {
            let id = parse_id(&mut t)?;
            let mv = t.next().ok_or("usage: move <id> <cell><X|O>")?;
            Ok((PacketType::Move, id, Role::None, mv.as_bytes().to_vec()))
        }
        "help" | "?" => Err("see commands below".into()),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_id<'a>(t: &mut impl Iterator<Item = &'a str>) -> Result<u8, String> {
    t.next()
        .ok_or("missing id")?
        .parse::<u8>()
        .map_err(|_| "id must be 0..255".to_string())
}
