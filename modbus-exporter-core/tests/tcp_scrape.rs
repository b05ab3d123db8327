//! Integration tests for scraping over Modbus TCP.
//!
//! These tests run a tokio-modbus server on a loopback port and scrape it
//! through [`TcpTransport`].

use std::collections::{BTreeMap, HashMap};
use std::future;
use std::net::SocketAddr;
use std::time::Duration;

use modbus_exporter_core::collector::{MetricsSink, Sample, collect};
use modbus_exporter_core::reader::scrape_target;
use modbus_exporter_core::{
    DataType, DeviceProfile, FunctionCode, RegisterDescriptor, ScrapeError, TcpTransport,
    WordOrder, build_workload,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};

/// Simulated field device with fixed register content.
struct TestDevice {
    input_registers: HashMap<u16, u16>,
    holding_registers: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
}

impl TestDevice {
    fn new() -> Self {
        Self {
            input_registers: HashMap::from([(331, 230), (350, 0xFFF6)]),
            // 66921 split over two registers, low word first
            holding_registers: HashMap::from([(100, 0x0569), (101, 0x0001), (200, 0x42F6), (201, 0xE979)]),
            coils: HashMap::from([(7, true), (8, false)]),
        }
    }
}

fn read_registers(map: &HashMap<u16, u16>, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
    (addr..addr.saturating_add(cnt))
        .map(|a| map.get(&a).copied().ok_or(ExceptionCode::IllegalDataAddress))
        .collect()
}

impl tokio_modbus::server::Service for TestDevice {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadInputRegisters(addr, cnt) => {
                read_registers(&self.input_registers, addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                read_registers(&self.holding_registers, addr, cnt)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::ReadCoils(addr, cnt) => (addr..addr.saturating_add(cnt))
                .map(|a| self.coils.get(&a).copied().ok_or(ExceptionCode::IllegalDataAddress))
                .collect::<Result<Vec<_>, _>>()
                .map(Response::ReadCoils),
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(res)
    }
}

async fn start_device() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(listener);

    let handle = tokio::spawn(async move {
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, |_| Ok(Some(TestDevice::new())))
        };
        let on_process_error = |err| {
            eprintln!("test device error: {err}");
        };
        let _ = server.serve(&on_connected, on_process_error).await;
    });

    (addr, handle)
}

fn register(
    name: &str,
    si_name: &str,
    address: &str,
    data_type: DataType,
    func_code: Option<FunctionCode>,
) -> RegisterDescriptor {
    RegisterDescriptor {
        register_name: name.to_string(),
        register_si_name: si_name.to_string(),
        register_type: data_type,
        register_address: address.to_string(),
        register_func_code: func_code,
        ..Default::default()
    }
}

fn profile(registers: Vec<RegisterDescriptor>) -> DeviceProfile {
    DeviceProfile {
        device_timeout: Some("1s".to_string()),
        device_modbus_id: 1,
        device_labels: BTreeMap::from([("location".to_string(), "DC-2".to_string())]),
        device_registers: registers,
        ..Default::default()
    }
}

#[derive(Default)]
struct RecordingSink {
    samples: Vec<Sample>,
    errors: Vec<String>,
}

impl MetricsSink for RecordingSink {
    fn emit(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    fn invalid(&mut self, error: &ScrapeError) {
        self.errors.push(error.to_string());
    }
}

#[tokio::test]
async fn test_scrape_mixed_function_codes() {
    let (addr, server) = start_device().await;

    let mut swapped = register(
        "E1",
        "energy",
        "dec#100",
        DataType::Uint32,
        Some(FunctionCode::ReadHoldingRegisters),
    );
    swapped.register_word_order = WordOrder::Swapped;

    let workload = build_workload(&profile(vec![
        register("U1", "voltage", "dec#331", DataType::Word, None),
        register("T1", "temperature", "hex#15E", DataType::Int16, None),
        swapped,
        register(
            "P1",
            "power",
            "dec#200",
            DataType::Float32,
            Some(FunctionCode::ReadHoldingRegisters),
        ),
        register("QF1", "breaker", "dec#7", DataType::Word, Some(FunctionCode::ReadCoils)),
        register("QF2", "breaker", "dec#8", DataType::Word, Some(FunctionCode::ReadCoils)),
    ]))
    .unwrap();

    let units = scrape_target(&TcpTransport, &addr.to_string(), workload)
        .await
        .unwrap();

    let values: BTreeMap<_, _> = units.iter().map(|u| (u.name.as_str(), u.value)).collect();
    assert_eq!(values["U1"], 230.0);
    assert_eq!(values["T1"], -10.0);
    assert_eq!(values["E1"], 66921.0);
    assert!((values["P1"] - 123.456).abs() < 0.001);
    assert_eq!(values["QF1"], 1.0);
    assert_eq!(values["QF2"], 0.0);

    server.abort();
}

#[tokio::test]
async fn test_collect_over_tcp() {
    let (addr, server) = start_device().await;

    let workload = build_workload(&profile(vec![register(
        "U1",
        "Voltage",
        "dec#331",
        DataType::Word,
        None,
    )]))
    .unwrap();

    let mut sink = RecordingSink::default();
    let summary = collect(&TcpTransport, &addr.to_string(), workload, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.data_units, 1);
    assert!(sink.errors.is_empty());

    let voltage = sink
        .samples
        .iter()
        .find(|s| s.name == "modbus_voltage")
        .unwrap();
    assert_eq!(voltage.value, 230.0);
    assert_eq!(voltage.labels["register_name"], "U1");
    assert_eq!(voltage.labels["location"], "DC-2");

    server.abort();
}

#[tokio::test]
async fn test_zero_based_addressing() {
    let (addr, server) = start_device().await;

    let mut profile = profile(vec![register("U1", "voltage", "dec#332", DataType::Word, None)]);
    profile.device_zero_based_addressing = true;

    let units = scrape_target(&TcpTransport, &addr.to_string(), build_workload(&profile).unwrap())
        .await
        .unwrap();

    assert_eq!(units[0].value, 230.0);

    server.abort();
}

#[tokio::test]
async fn test_device_exception_fails_whole_scrape() {
    let (addr, server) = start_device().await;

    let workload = build_workload(&profile(vec![
        register("U1", "voltage", "dec#331", DataType::Word, None),
        register("X", "missing", "dec#999", DataType::Word, None),
    ]))
    .unwrap();

    let mut sink = RecordingSink::default();
    let err = collect(&TcpTransport, &addr.to_string(), workload, &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::Read { address: 999, .. }));
    assert!(sink.samples.is_empty());
    assert_eq!(sink.errors.len(), 1);

    server.abort();
}

#[tokio::test]
async fn test_connection_refused() {
    // Grab a free port, then release it so nothing listens there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let workload = build_workload(&profile(vec![register(
        "U1",
        "voltage",
        "dec#331",
        DataType::Word,
        None,
    )]))
    .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        scrape_target(&TcpTransport, &addr.to_string(), workload),
    )
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.kind(), "connection");
    assert!(err.to_string().contains(&addr.to_string()));
}
