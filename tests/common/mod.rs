#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const RESPONSE_HEADERS: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n";

pub fn solid_jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
    encode(&RgbImage::from_pixel(width, height, Rgb([shade, shade / 2, 255 - shade])))
}

pub fn noisy_jpeg(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let img = RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
    encode(&img)
}

fn encode(img: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    JpegEncoder::new(&mut bytes)
        .encode_image(img)
        .expect("encode jpeg");
    bytes
}

/// Multipart part wrapping one JPEG, the way the camera firmware sends it.
pub fn part(jpeg: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )
    .into_bytes();
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    out
}

/// What the fake camera does after sending its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterPayload {
    /// Keep the socket open until the client goes away.
    Hold,
    /// Close the connection.
    Close,
}

/// Single-connection fake camera on a loopback port.
pub struct FakeCamera {
    pub port: u16,
    join: JoinHandle<String>,
}

impl FakeCamera {
    pub fn spawn(payload: Vec<u8>, after: AfterPayload) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake camera");
        let port = listener.local_addr().expect("local addr").port();
        let join = thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept client");
            let request = read_request(&mut socket);
            // The client may hang up mid-payload; that is its business.
            if socket.write_all(&payload).and_then(|_| socket.flush()).is_err() {
                return request;
            }
            if after == AfterPayload::Hold {
                let mut sink = [0u8; 256];
                // Returns once the client shuts the connection down.
                while matches!(socket.read(&mut sink), Ok(n) if n > 0) {}
            }
            request
        });
        Self { port, join }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/stream", self.port)
    }

    /// The request the client sent.
    pub fn finish(self) -> String {
        self.join.join().expect("fake camera thread")
    }
}

fn read_request(socket: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    while !request.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte) {
            Ok(1) => request.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&request).into_owned()
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}
