//! Line protocol spoken by the stub while serving.
//!
//! - `INSERT <text>` stores a row and answers `OK`.
//! - `COUNT` answers the number of stored rows.
//! - `SEARCH <term>` answers `HITS <n>` once the index was built, or
//!   `ERR index not ready` otherwise.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::store::Store;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts connections on `127.0.0.1:port` until the process is killed.
///
/// # Errors
///
/// Returns the bind error; a port that is already taken is never shared.
pub fn serve(port: u16, store: Store) -> io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    let shared = Arc::new(Mutex::new(store));
    for stream in listener.incoming() {
        let Ok(connection) = stream else {
            continue;
        };
        let handle_store = Arc::clone(&shared);
        thread::spawn(move || drop(handle(connection, &handle_store)));
    }
    Ok(())
}

fn handle(stream: TcpStream, store: &Mutex<Store>) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    for read in BufReader::new(stream).lines() {
        let line = read?;
        let reply = match store.lock() {
            Ok(guard) => respond(&guard, line.trim()),
            Err(_) => "ERR store unavailable".to_owned(),
        };
        writeln!(writer, "{reply}")?;
    }
    Ok(())
}

/// Answers one request against `store`.
#[must_use]
pub fn respond(store: &Store, line: &str) -> String {
    let (verb, argument) = line.split_once(' ').unwrap_or((line, ""));
    let outcome = match verb {
        "INSERT" => store
            .update(|state| state.rows.push(argument.to_owned()))
            .map(|()| "OK".to_owned()),
        "COUNT" => store.load().map(|state| state.rows.len().to_string()),
        "SEARCH" => store.load().map(|state| {
            if state.indexed {
                let hits = state.rows.iter().filter(|row| row.contains(argument)).count();
                format!("HITS {hits}")
            } else {
                "ERR index not ready".to_owned()
            }
        }),
        _ => Ok(format!("ERR unknown request '{verb}'")),
    };
    outcome.unwrap_or_else(|error| format!("ERR {error}"))
}

/// Sends one request to a stub listening on `port` and returns the reply.
///
/// # Errors
///
/// Returns the IO error when connecting, sending or reading fails.
pub fn request(port: u16, line: &str) -> io::Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
    writeln!(stream, "{line}")?;
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    Ok(reply.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn scratch() -> (TempDir, Store) {
        let dir = TempDir::new().expect("temp dir");
        let store = Store::beside(&dir.path().join("config.toml"));
        (dir, store)
    }

    #[rstest]
    fn search_requires_a_built_index(scratch: (TempDir, Store)) {
        let (_dir, store) = scratch;
        assert_eq!(respond(&store, "INSERT intro lecture"), "OK");
        assert_eq!(respond(&store, "SEARCH lecture"), "ERR index not ready");
        store.update(|state| state.indexed = true).expect("index");
        assert_eq!(respond(&store, "SEARCH lecture"), "HITS 1");
        assert_eq!(respond(&store, "COUNT"), "1");
    }

    #[rstest]
    fn unknown_verbs_are_answered_with_an_error(scratch: (TempDir, Store)) {
        let (_dir, store) = scratch;
        assert_eq!(respond(&store, "DELETE"), "ERR unknown request 'DELETE'");
    }
}
