//! End-to-end tests: a real server on a real Unix socket, raw protocol
//! bytes on the wire.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Release;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use skeep_keys::catalog::TokenCatalog;
use skeep_keys::recipient::parse_recipient_ids;
use skeep_keys::test_support::write_token_files;
use skeep_server::cache::SecretCache;
use skeep_server::config::{CacheStrategy, LogTarget, Settings};
use skeep_server::context::ServerContext;
use skeep_server::server::Server;
use skeep_server::store::SecretStore;

fn settings_for(dir: &Path, tag: &str) -> Settings {
    Settings {
        namespace: tag.to_string(),
        cache_strategy: CacheStrategy::Preload,
        log: LogTarget::Console,
        tokens: vec![write_token_files(dir, tag, 1, None)],
        socket_file: dir.join(format!("{tag}.sock")),
        socket_mode: 0o600,
        max_servers: 2,
        pid_file: dir.join(format!("{tag}.pid")),
        user: None,
        group: None,
        storage_dir: dir.join("slots"),
        storage_umask: None,
        memcache_servers: Vec::new(),
        access_read: true,
        access_write: true,
    }
}

struct RunningServer {
    socket: PathBuf,
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    fn start(settings: Settings) -> RunningServer {
        let catalog = TokenCatalog::load(&settings.tokens).unwrap();
        let store = SecretStore::new(settings.storage_dir.clone());
        let cache = SecretCache::local_only();
        cache.preload(&store, &catalog);

        let socket = settings.socket_file.clone();
        let ctx = Arc::new(ServerContext::new(settings, catalog, store, cache));
        let server = Server::new(ctx);
        let shutdown = server.shutdown_handle();
        let reload = server.reload_handle();
        let handle = std::thread::spawn(move || server.run().unwrap());

        wait_for_socket(&socket);
        RunningServer {
            socket,
            shutdown,
            reload,
            handle,
        }
    }

    fn stop(self) {
        self.shutdown.store(false, Release);
        self.handle.join().unwrap();
    }
}

fn wait_for_socket(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("server socket {} never appeared", path.display());
}

/// Send raw request bytes, half-close, and collect the full response.
fn transact(socket: &Path, request: &[u8]) -> Vec<u8> {
    let mut stream = UnixStream::connect(socket).unwrap();
    stream.write_all(request).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    response
}

fn set(socket: &Path, key: &str, value: &[u8]) -> Vec<u8> {
    let mut request = format!("set {key}\r\n").into_bytes();
    request.extend_from_slice(value);
    transact(socket, &request)
}

fn get(socket: &Path, key: &str) -> Vec<u8> {
    transact(socket, format!("get {key}\r\n").as_bytes())
}

#[test]
fn protocol_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let server = RunningServer::start(settings_for(dir.path(), "round"));
    let socket = server.socket.clone();

    assert_eq!(set(&socket, "greeting", b"hello"), b"STORED\r\n");
    assert_eq!(get(&socket, "greeting"), b"hello");

    let blob: Vec<u8> = (0u8..=255).collect();
    assert_eq!(set(&socket, "blob", &blob), b"STORED\r\n");
    assert_eq!(get(&socket, "blob"), blob);

    assert_eq!(get(&socket, "does_not_exist"), b"");
    assert_eq!(transact(&socket, b"delete foo\r\n"), b"ERROR\r\n");
    assert_eq!(
        transact(&socket, b"get bad-key\r\n"),
        b"CLIENT_ERROR invalid syntax\r\n"
    );

    server.stop();
}

#[test]
fn values_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path(), "restart");

    let server = RunningServer::start(settings.clone());
    assert_eq!(set(&server.socket, "durable", b"kept"), b"STORED\r\n");
    server.stop();

    // same storage dir and token files, fresh process state
    let server = RunningServer::start(settings);
    assert_eq!(get(&server.socket, "durable"), b"kept");
    server.stop();
}

#[test]
fn read_disabled_denies_even_existing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path(), "noread");
    settings.access_read = false;

    // put a value in the store before the server comes up
    let catalog = TokenCatalog::load(&settings.tokens).unwrap();
    SecretStore::new(settings.storage_dir.clone())
        .put("present", b"v", &catalog)
        .unwrap();

    let server = RunningServer::start(settings);
    assert_eq!(
        get(&server.socket, "present"),
        b"CLIENT_ERROR access denied\r\n"
    );
    assert_eq!(
        get(&server.socket, "absent"),
        b"CLIENT_ERROR access denied\r\n"
    );
    assert_eq!(set(&server.socket, "x", b"y"), b"STORED\r\n");
    server.stop();
}

#[test]
fn write_disabled_denies_set_and_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path(), "nowrite");
    settings.access_write = false;
    let storage_dir = settings.storage_dir.clone();

    let server = RunningServer::start(settings);
    assert_eq!(
        set(&server.socket, "x", b"y"),
        b"CLIENT_ERROR access denied\r\n"
    );
    assert_eq!(get(&server.socket, "x"), b"");
    server.stop();

    assert!(!storage_dir.join("x").exists());
}

#[test]
fn concurrent_reads_never_see_a_torn_value() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path(), "atomic");
    let server = RunningServer::start(settings.clone());
    let socket = server.socket.clone();

    let first = vec![b'a'; 512];
    let second = vec![b'z'; 2048];
    assert_eq!(set(&socket, "contended", &first), b"STORED\r\n");

    let writer_socket = socket.clone();
    let (w1, w2) = (first.clone(), second.clone());
    let writer = std::thread::spawn(move || {
        for i in 0..20 {
            let value = if i % 2 == 0 { &w2 } else { &w1 };
            assert_eq!(set(&writer_socket, "contended", value), b"STORED\r\n");
        }
    });

    // Read the slot file directly, bypassing the server's cache: a torn
    // write would surface here as a decrypt failure or a truncated value.
    let catalog = TokenCatalog::load(&settings.tokens).unwrap();
    let store = SecretStore::new(settings.storage_dir.clone());
    for _ in 0..40 {
        let seen = store.get("contended", &catalog).expect("never torn");
        assert!(
            seen == first || seen == second,
            "torn read: {} bytes",
            seen.len()
        );
    }

    writer.join().unwrap();
    server.stop();
}

#[test]
fn sighup_reload_picks_up_rotated_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path(), "rotate");
    let storage_dir = settings.storage_dir.clone();

    let server = RunningServer::start(settings);
    assert_eq!(set(&server.socket, "before", b"old"), b"STORED\r\n");
    let recipient_before =
        parse_recipient_ids(&std::fs::read(storage_dir.join("before")).unwrap()).unwrap();

    // rotate the token material on disk, then ask for a reload
    write_token_files(dir.path(), "rotate", 2, None);
    server.reload.store(true, Release);
    std::thread::sleep(Duration::from_millis(400));

    assert_eq!(set(&server.socket, "after", b"new"), b"STORED\r\n");
    let recipient_after =
        parse_recipient_ids(&std::fs::read(storage_dir.join("after")).unwrap()).unwrap();

    assert_ne!(recipient_before, recipient_after);
    assert_eq!(get(&server.socket, "after"), b"new");
    server.stop();
}

#[test]
fn socket_and_pid_files_are_managed() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path(), "files");
    let socket_path = settings.socket_file.clone();
    let pid_path = settings.pid_file.clone();

    let server = RunningServer::start(settings.clone());
    let pid_text = std::fs::read_to_string(&pid_path).unwrap();
    assert_eq!(pid_text.trim(), std::process::id().to_string());

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    server.stop();
    assert!(!socket_path.exists());
    assert!(!pid_path.exists());

    // a leftover socket file from a dead instance is cleaned up on bind
    std::os::unix::net::UnixListener::bind(&socket_path).unwrap();
    assert!(socket_path.exists());
    let server = RunningServer::start(settings);
    assert_eq!(get(&server.socket, "nothing"), b"");
    server.stop();
}

#[test]
fn refusing_to_clobber_a_regular_file_at_the_socket_path() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path(), "clobber");
    std::fs::write(&settings.socket_file, b"precious").unwrap();

    let catalog = TokenCatalog::load(&settings.tokens).unwrap();
    let store = SecretStore::new(settings.storage_dir.clone());
    let socket_file = settings.socket_file.clone();
    let ctx = Arc::new(ServerContext::new(
        settings,
        catalog,
        store,
        SecretCache::local_only(),
    ));

    assert!(Server::new(ctx).run().is_err());
    assert_eq!(std::fs::read(socket_file).unwrap(), b"precious");
}
