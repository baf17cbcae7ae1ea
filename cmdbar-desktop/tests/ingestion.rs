use std::{
    io::{Read, Write},
    net::{Ipv4Addr, TcpStream},
    sync::mpsc::{self, Receiver},
    time::{Duration, Instant},
};

use cmdbar_core::ScreenRect;
use cmdbar_desktop::{
    coordinator::{Coordinator, UiEvent},
    runtime::spawn_ingestion,
};
use cmdbar_listener::ListenerConfig;

const BUILD: &str = r#"{"id":1,"text":"build","duration":5000000000}"#;

#[test]
fn posted_commands_become_overlays_on_the_ui_thread() {
    let (ui_event_tx, ui_event_rx) = mpsc::channel();
    let ingestion = spawn_ingestion(
        ListenerConfig {
            port: 0,
            max_port_attempts: 1,
        },
        ui_event_tx,
    )
    .expect("spawn ingestion");

    let mut coordinator = Coordinator::new(ScreenRect::new(0, 0, 1440, 900));
    wait_for(&ui_event_rx, &mut coordinator, |c| {
        c.status().starts_with("Server running on port")
    });
    let port = ingestion.bound_port().expect("listener bound");
    assert_eq!(
        coordinator.status(),
        format!("Server running on port {port}")
    );

    assert!(post_command(port, BUILD).starts_with("HTTP/1.1 200 OK"));
    assert!(post_command(port, BUILD).starts_with("HTTP/1.1 200 OK"));
    assert!(post_command(port, "nope").starts_with("HTTP/1.1 400 Bad Request"));

    wait_for(&ui_event_rx, &mut coordinator, |c| c.list_active().len() == 2);
    let active = coordinator.list_active().to_vec();
    assert!(active.iter().all(|entry| entry.command.id == 1));
    assert_ne!(active[0].id, active[1].id);

    assert!(coordinator.dismiss(active[0].id));
    assert!(!coordinator.dismiss(active[0].id));
    assert_eq!(coordinator.list_active().len(), 1);
    assert_eq!(coordinator.list_active()[0].origin, active[1].origin);

    ingestion.shutdown();
    ingestion.shutdown();
    wait_for(&ui_event_rx, &mut coordinator, |c| c.status() == "Server stopped");
    assert_eq!(ingestion.bound_port(), None);
}

#[test]
fn exhausted_ports_surface_as_failed_status() {
    let occupied = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("occupy port");
    let port = occupied.local_addr().expect("occupied addr").port();

    let (ui_event_tx, ui_event_rx) = mpsc::channel();
    let ingestion = spawn_ingestion(
        ListenerConfig {
            port,
            max_port_attempts: 1,
        },
        ui_event_tx,
    )
    .expect("spawn ingestion");

    let mut coordinator = Coordinator::new(ScreenRect::default());
    wait_for(&ui_event_rx, &mut coordinator, |c| {
        c.status().starts_with("Server failed")
    });
    assert_eq!(ingestion.bound_port(), None);
    ingestion.shutdown();
}

#[test]
fn shutdown_right_after_spawn_leaves_nothing_listening() {
    let (ui_event_tx, ui_event_rx) = mpsc::channel();
    let ingestion = spawn_ingestion(
        ListenerConfig {
            port: 0,
            max_port_attempts: 1,
        },
        ui_event_tx,
    )
    .expect("spawn ingestion");

    ingestion.shutdown();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(ingestion.bound_port(), None);

    let mut coordinator = Coordinator::new(ScreenRect::default());
    wait_for(&ui_event_rx, &mut coordinator, |c| c.status() == "Server stopped");
    std::thread::sleep(Duration::from_millis(100));
    let _ = coordinator.poll_ui_events(&ui_event_rx, Instant::now());
    assert_eq!(coordinator.status(), "Server stopped");
    assert_eq!(ingestion.bound_port(), None);
}

/// Plays the UI thread: applies queued events until `done` holds.
fn wait_for(
    ui_event_rx: &Receiver<UiEvent>,
    coordinator: &mut Coordinator<ScreenRect>,
    done: impl Fn(&Coordinator<ScreenRect>) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(coordinator) {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .expect("timed out waiting for ui events");
        if let Ok(event) = ui_event_rx.recv_timeout(remaining) {
            coordinator.handle_event(event, Instant::now());
        }
    }
}

fn post_command(port: u16, body: &str) -> String {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    let request = format!(
        "POST /command HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).expect("write request");

    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    response
}
