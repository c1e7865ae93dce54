//! An in-process key-value device simulator for client tests: a single-shot
//! TCP server that speaks the frame protocol over an in-memory store, with a
//! switch for delivering responses out of order.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use kvc::{Request, RequestFrame, Response, ResponseFrame};
use serde_json::Deserializer;

/// how the simulated device orders its responses
pub enum DeliveryOrder {
    /// respond to each request as it arrives
    InOrder,
    /// buffer requests in pairs and answer each pair in reverse, so the
    /// client's sequence correlation actually gets exercised
    PairsReversed,
}

pub struct DeviceSim {
    pub addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl DeviceSim {
    /// starts a simulator that serves one connection, then exits
    pub fn spawn(order: DeliveryOrder) -> DeviceSim {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream, order);
            }
        });
        DeviceSim {
            addr,
            handle: Some(handle),
        }
    }

    /// starts a simulator that accepts one connection, reads a single
    /// request, and hangs up without answering
    pub fn spawn_silent() -> DeviceSim {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let reader = BufReader::new(stream);
                let mut frames = Deserializer::from_reader(reader).into_iter::<RequestFrame>();
                let _ = frames.next();
                // connection drops here
            }
        });
        DeviceSim {
            addr,
            handle: Some(handle),
        }
    }
}

impl Drop for DeviceSim {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(stream: TcpStream, order: DeliveryOrder) {
    let mut store: BTreeMap<String, String> = BTreeMap::new();
    let reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = BufWriter::new(stream);
    let frames = Deserializer::from_reader(reader).into_iter::<RequestFrame>();

    let mut held: Option<ResponseFrame> = None;
    for frame in frames {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let out = ResponseFrame {
            seq: frame.seq,
            resp: apply(&mut store, frame.req),
        };

        match order {
            DeliveryOrder::InOrder => send(&mut writer, &out),
            DeliveryOrder::PairsReversed => match held.take() {
                None => held = Some(out),
                Some(first) => {
                    send(&mut writer, &out);
                    send(&mut writer, &first);
                }
            },
        }
    }

    // an odd trailing request still gets its answer
    if let Some(last) = held.take() {
        send(&mut writer, &last);
    }
}

fn apply(store: &mut BTreeMap<String, String>, req: Request) -> Response {
    match req {
        Request::Put { key, value } => {
            store.insert(key, value);
            Response::Ok(None)
        }
        Request::Get { key } => Response::Ok(store.get(&key).cloned()),
        Request::Delete { key } => match store.remove(&key) {
            Some(_) => Response::Ok(None),
            None => Response::Err("key not found".to_string()),
        },
        Request::GetKeyRange { start, end, max } => {
            let keys = store
                .range(start..=end)
                .take(max)
                .map(|(key, _)| key.clone())
                .collect();
            Response::Keys(keys)
        }
        Request::Noop => Response::Ok(None),
    }
}

fn send(writer: &mut BufWriter<TcpStream>, frame: &ResponseFrame) {
    serde_json::to_writer(&mut *writer, frame).unwrap();
    writer.flush().unwrap();
}
