//! Drives the virtual table end to end against a loopback HTTP fixture:
//! `CREATE VIRTUAL TABLE`, `SELECT`, and the planner-rejection path all go
//! through a real `rusqlite::Connection`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use rusqlite::Connection;

fn spawn_fixture_server(response: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture listener");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            drain_request(&mut stream);
            let _ = stream.write_all(response);
            let _ = stream.flush();
        }
    });
    port
}

fn drain_request(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    let mut seen = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

fn json_response(body: &str) -> &'static str {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    Box::leak(response.into_boxed_str())
}

#[test]
fn select_star_with_url_predicate_projects_declared_columns() {
    let port = spawn_fixture_server(json_response("{\"id\":1,\"name\":\"ada\"}").as_bytes());
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    conn.execute_batch(
        "CREATE VIRTUAL TABLE people USING httpvtab(id INT, name TEXT)",
    )
    .unwrap();

    let url = format!("http://127.0.0.1:{port}/");
    let mut stmt = conn
        .prepare("SELECT id, name FROM people WHERE url = ?1")
        .unwrap();
    let mut rows = stmt.query(rusqlite::params![url]).unwrap();
    let row = rows.next().unwrap().expect("one row");
    let id: i64 = row.get(0).unwrap();
    let name: String = row.get(1).unwrap();
    assert_eq!(id, 1);
    assert_eq!(name, "ada");
    assert!(rows.next().unwrap().is_none());
}

#[test]
fn top_level_array_response_yields_multiple_rows() {
    let port = spawn_fixture_server(json_response("[{\"id\":1},{\"id\":2}]").as_bytes());
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    conn.execute_batch("CREATE VIRTUAL TABLE items USING httpvtab(id INT)").unwrap();

    let url = format!("http://127.0.0.1:{port}/");
    let mut stmt = conn.prepare("SELECT id FROM items WHERE url = ?1").unwrap();
    let ids: Vec<i64> = stmt
        .query_map(rusqlite::params![url], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn generated_path_column_descends_nested_objects() {
    let port = spawn_fixture_server(json_response("{\"user\":{\"profile\":{\"name\":\"grace\"}}}").as_bytes());
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    conn.execute_batch(
        "CREATE VIRTUAL TABLE nested USING httpvtab(display_name TEXT GENERATED ALWAYS AS (user->profile->name))",
    )
    .unwrap();

    let url = format!("http://127.0.0.1:{port}/");
    let mut stmt = conn.prepare("SELECT display_name FROM nested WHERE url = ?1").unwrap();
    let name: String = stmt.query_row(rusqlite::params![url], |row| row.get(0)).unwrap();
    assert_eq!(name, "grace");
}

#[test]
fn default_url_is_used_when_no_where_clause_constrains_it() {
    let port = spawn_fixture_server(json_response("{\"id\":42}").as_bytes());
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    let url = format!("http://127.0.0.1:{port}/");
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE defaulted USING httpvtab(url TEXT DEFAULT '{url}', id INT)"
    ))
    .unwrap();

    let id: i64 = conn
        .query_row("SELECT id FROM defaulted", [], |row| row.get(0))
        .unwrap();
    assert_eq!(id, 42);
}

#[test]
fn missing_url_predicate_and_no_default_is_rejected_at_plan_time() {
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    conn.execute_batch("CREATE VIRTUAL TABLE unconstrained USING httpvtab(id INT)")
        .unwrap();

    let err = conn.prepare("SELECT id FROM unconstrained");
    assert!(err.is_err());
}

#[test]
fn empty_response_body_yields_zero_rows() {
    let response: &'static [u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    let port = spawn_fixture_server(response);
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    conn.execute_batch("CREATE VIRTUAL TABLE empty_body USING httpvtab(id INT)")
        .unwrap();

    let url = format!("http://127.0.0.1:{port}/");
    let mut stmt = conn.prepare("SELECT id FROM empty_body WHERE url = ?1").unwrap();
    let mut rows = stmt.query(rusqlite::params![url]).unwrap();
    assert!(rows.next().unwrap().is_none());
}

#[test]
fn missing_json_field_projects_as_null() {
    let port = spawn_fixture_server(json_response("{\"id\":1}").as_bytes());
    let conn = Connection::open_in_memory().unwrap();
    httpvtab::register(&conn).unwrap();
    conn.execute_batch("CREATE VIRTUAL TABLE sparse USING httpvtab(id INT, missing TEXT)")
        .unwrap();

    let url = format!("http://127.0.0.1:{port}/");
    let missing: Option<String> = conn
        .query_row("SELECT missing FROM sparse WHERE url = ?1", rusqlite::params![url], |row| row.get(0))
        .unwrap();
    assert_eq!(missing, None);
}
