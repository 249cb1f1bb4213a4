use chronicle::client::Client;
use chronicle::config::Config;
use chronicle_packets::frame;
use chronicle_packets::handshake::HandshakePacket;
use chronicle_packets::login::clientbound::{LoginSuccessPacket, SetCompressionPacket};
use chronicle_packets::login::serverbound::LoginStartPacket;
use chronicle_packets::play::TimeUpdatePacket;
use chronicle_packets::registry::{Clientbound, PacketTable};
use chronicle_packets::{
    AsyncReadPacket, AsyncWritePacket, Packet, ReadPacket, State, VarInt, WritePacket,
};
use std::io::{Cursor, Read};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

const COMPRESSION_THRESHOLD: VarInt = 64;

/// Drives the server side of an offline login and hands back the play-state socket.
async fn accept_login(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.expect("accept failed");

    let handshake = frame::read_frame(&mut stream, None)
        .await
        .expect("handshake read failed");
    let mut body = Cursor::new(handshake.body);
    let handshake = HandshakePacket::read_from_buffer(&mut body)
        .await
        .expect("handshake parse failed");
    assert_eq!(handshake.protocol_version, 754);
    assert_eq!(handshake.next_state, State::Login);

    let login_start = frame::read_frame(&mut stream, None)
        .await
        .expect("login read failed");
    let mut body = Cursor::new(login_start.body);
    let login_start = LoginStartPacket::read_from_buffer(&mut body)
        .await
        .expect("login start parse failed");

    // enable compression, then confirm the login in the compressed format
    let mut body = Vec::new();
    SetCompressionPacket {
        threshold: COMPRESSION_THRESHOLD,
    }
    .write_to_buffer(&mut body)
    .await
    .expect("compression body failed");
    frame::write_frame(&mut stream, None, SetCompressionPacket::ID, &body)
        .await
        .expect("compression write failed");

    let mut body = Vec::new();
    LoginSuccessPacket {
        user_id: Uuid::from_u128(0xCAFE),
        user_name: login_start.user_name.clone(),
    }
    .write_versioned(&mut body, 754)
    .await
    .expect("success body failed");
    frame::write_frame(
        &mut stream,
        Some(COMPRESSION_THRESHOLD),
        LoginSuccessPacket::ID,
        &body,
    )
    .await
    .expect("success write failed");

    stream
}

async fn send_play(stream: &mut TcpStream, id: VarInt, body: &[u8]) {
    frame::write_frame(stream, Some(COMPRESSION_THRESHOLD), id, body)
        .await
        .expect("play write failed");
}

fn read_zip_entry(archive: &std::path::Path, name: &str) -> Vec<u8> {
    let file = std::fs::File::open(archive).expect("open archive failed");
    let mut zip = zip::ZipArchive::new(file).expect("read archive failed");
    let mut entry = zip.by_name(name).expect("entry missing");
    let mut content = Vec::new();
    entry.read_to_end(&mut content).expect("read entry failed");
    content
}

/// Splits a `.tmcpr` byte stream back into `(time_offset, raw_frame)` pairs.
fn parse_recording(raw: &[u8]) -> Vec<(i32, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < raw.len() {
        let time = i32::from_be_bytes(raw[offset..offset + 4].try_into().expect("short header"));
        let length =
            i32::from_be_bytes(raw[offset + 4..offset + 8].try_into().expect("short header"))
                as usize;
        frames.push((time, raw[offset + 8..offset + 8 + length].to_vec()));
        offset += 8 + length;
    }
    frames
}

#[tokio::test]
async fn records_a_synthetic_session_end_to_end() {
    let workspace = tempfile::tempdir().expect("tempdir failed");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let port = listener.local_addr().expect("local addr failed").port();

    let config = Config {
        address: "127.0.0.1".to_string(),
        port,
        online_mode: false,
        initial_version: "1.16.5".to_string(),
        daytime: 6000,
        auto_relogin: false,
        with_player_only: false,
        recording_temp_directory: workspace
            .path()
            .join("work")
            .to_string_lossy()
            .into_owned(),
        recording_storage_directory: workspace
            .path()
            .join("storage")
            .to_string_lossy()
            .into_owned(),
        ..Config::default()
    };
    let storage = workspace.path().join("storage");

    let client = Client::new(config, "unused-config.json");
    let table = PacketTable::new(754).expect("table build failed");

    let server = tokio::spawn({
        let join_game_id = table.id_of(Clientbound::JoinGame).expect("id missing");
        let time_update_id = table.id_of(Clientbound::TimeUpdate).expect("id missing");
        let entity_position_id = table.id_of(Clientbound::EntityPosition).expect("id missing");
        let disconnect_id = table.id_of(Clientbound::Disconnect).expect("id missing");
        async move {
            let mut stream = accept_login(&listener).await;

            // a join so the client flips to connected
            send_play(&mut stream, join_game_id, &[0u8; 48]).await;

            // five world time packets; only the first survives, rewritten
            for _ in 0..5 {
                let mut body = Vec::new();
                TimeUpdatePacket {
                    world_age: 1,
                    time_of_day: 17_000,
                }
                .write(&mut body)
                .await
                .expect("time body failed");
                send_play(&mut stream, time_update_id, &body).await;
            }

            // ninety entity moves, padded so the recording clears the minimum archive size
            for i in 0..90i32 {
                let mut body = Vec::new();
                body.write_varint(5).await.expect("entity id failed");
                body.extend_from_slice(&[i as u8; 150]);
                send_play(&mut stream, entity_position_id, &body).await;
            }

            // kick the client; the kick itself must not be recorded
            let mut body = Vec::new();
            body.write_string(r#"{"text":"server closing"}"#)
                .await
                .expect("reason failed");
            send_play(&mut stream, disconnect_id, &body).await;

            // drain client traffic until it hangs up
            let mut sink = [0u8; 1024];
            while stream.read(&mut sink).await.is_ok_and(|read| read > 0) {}
        }
    });

    assert!(client.start().await, "start failed");

    // wait for the archive to land
    for _ in 0..200 {
        if client.is_fully_stopped() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(client.is_fully_stopped(), "client did not settle");
    server.await.expect("server task failed");

    let archive = std::fs::read_dir(&storage)
        .expect("storage missing")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.extension().is_some_and(|ext| ext == "mcpr"))
        .expect("no archive created");

    let recording = read_zip_entry(&archive, "recording.tmcpr");
    let frames = parse_recording(&recording);

    // join + one rewritten time update + ninety entity moves; the kick is filtered out
    assert_eq!(frames.len(), 92);

    // offsets never decrease and start at or above zero
    let mut last = 0;
    for (time, _) in &frames {
        assert!(*time >= last, "time offsets must be monotone");
        last = *time;
    }

    // exactly one time update survived and it carries the frozen daytime
    let time_update_id = table.id_of(Clientbound::TimeUpdate).expect("id missing");
    let mut time_updates = 0;
    for (_, raw) in &frames {
        let mut cursor = Cursor::new(raw.as_slice());
        let id = cursor.read_varint().await.expect("frame id failed");
        assert_ne!(
            Some(Clientbound::Disconnect),
            table.name_of(id),
            "the kick must not be recorded"
        );
        if id == time_update_id {
            time_updates += 1;
            let packet = TimeUpdatePacket::read(&mut cursor)
                .await
                .expect("time parse failed");
            assert_eq!(packet.time_of_day, -6000);
        }
    }
    assert_eq!(time_updates, 1);

    // the sidecar checksum matches the recording
    let crc_text = String::from_utf8(read_zip_entry(&archive, "recording.tmcpr.crc32"))
        .expect("crc not utf8");
    let mut crc = flate2::Crc::new();
    crc.update(&recording);
    assert_eq!(crc_text, crc.sum().to_string());

    // the metadata names the wire protocol and format version
    let meta: serde_json::Value =
        serde_json::from_slice(&read_zip_entry(&archive, "metaData.json")).expect("bad metadata");
    assert_eq!(meta["protocol"], 754);
    assert_eq!(meta["mcversion"], "1.16.5");
    assert_eq!(meta["fileFormatVersion"], 14);
    assert_eq!(meta["generator"], "PCRC");
}

mod msa_stub {
    use super::*;

    /// A tiny canned-response HTTP server for the five-step Microsoft flow.
    pub async fn serve(listener: TcpListener) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 1024];
                // read until the header block is complete
                while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
                    let Ok(read) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if read == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..read]);
                }
                let request = String::from_utf8_lossy(&buffer).into_owned();

                // drain the body per content-length so the client sees a clean response
                let header_end = buffer
                    .windows(4)
                    .position(|window| window == b"\r\n\r\n")
                    .unwrap_or(0)
                    + 4;
                let content_length = request
                    .lines()
                    .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
                    .and_then(|line| line.split(':').nth(1))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut remaining = content_length.saturating_sub(buffer.len() - header_end);
                while remaining > 0 {
                    let Ok(read) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if read == 0 {
                        break;
                    }
                    remaining = remaining.saturating_sub(read);
                }

                let path = request
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let body = match path.as_str() {
                    "/token" => {
                        r#"{"access_token":"msa-access-2","refresh_token":"msa-refresh-2"}"#
                    }
                    "/xbl" => {
                        r#"{"Token":"xbl-token","DisplayClaims":{"xui":[{"uhs":"user-hash"}]}}"#
                    }
                    "/xsts" => {
                        r#"{"Token":"xsts-token","DisplayClaims":{"xui":[{"uhs":"user-hash"}]}}"#
                    }
                    "/login" => r#"{"access_token":"mc-token-2"}"#,
                    "/entitlements" => r#"{"items":[{"name":"game_minecraft"}]}"#,
                    "/profile" => {
                        r#"{"id":"00000000000000000000000000000017","name":"Recorder"}"#
                    }
                    _ => "{}",
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    }
}

#[tokio::test]
async fn microsoft_refresh_rotates_the_stored_token() {
    use chronicle::authentication::{MicrosoftAuthenticator, MsaEndpoints};

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let base = format!("http://{}", listener.local_addr().expect("local addr failed"));
    tokio::spawn(msa_stub::serve(listener));

    let endpoints = MsaEndpoints {
        token_url: format!("{base}/token"),
        xbl_url: format!("{base}/xbl"),
        xsts_url: format!("{base}/xsts"),
        mc_login_url: format!("{base}/login"),
        entitlements_url: format!("{base}/entitlements"),
        profile_url: format!("{base}/profile"),
    };
    let mut authenticator = MicrosoftAuthenticator::with_endpoints(endpoints);

    // seed a stored refresh token as if a previous run had authenticated interactively
    let workspace = tempfile::tempdir().expect("tempdir failed");
    let token_path = workspace.path().join("token.json");
    std::fs::write(
        &token_path,
        serde_json::json!({
            "auth_type": "microsoft",
            "access_token": "",
            "secondary_token": "msa-refresh-1",
            "player_name": "Recorder",
            "player_id": Uuid::from_u128(0x17),
            "expires_at": (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before epoch")
                .as_secs()) + 3600,
        })
        .to_string(),
    )
    .expect("seed token failed");

    assert!(authenticator.load_stored(&token_path).expect("load failed"));
    assert!(!authenticator.needs_interactive_code());

    authenticator.refresh().await.expect("refresh failed");

    let token = authenticator.session_token().expect("token missing");
    assert_eq!(token.access_token, "mc-token-2");
    assert_eq!(token.player_name, "Recorder");
    assert_eq!(token.player_id, Uuid::from_u128(0x17));

    // the rotated refresh token is persisted with a future expiry
    authenticator.store(&token_path).expect("store failed");
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&token_path).expect("read failed"))
            .expect("bad token file");
    assert_eq!(stored["secondary_token"], "msa-refresh-2");
    let expires_at = stored["expires_at"].as_u64().expect("no expiry");
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs();
    assert!(expires_at > now);
}
