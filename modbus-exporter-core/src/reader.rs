//! Per-scrape read orchestration.

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, warn};

use crate::decode::{decode, registers_to_bytes};
use crate::error::{Result, ScrapeError};
use crate::transport::{Payload, Session, SessionError, Transport};
use crate::workload::{DataUnit, Device, Workload};

/// Port used when the scrape target does not name one.
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Append the default Modbus port to a target that has none.
pub fn normalize_target(target: &str) -> String {
    if target.parse::<SocketAddr>().is_ok() {
        return target.to_string();
    }

    let bare_ip = target
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(target)
        .parse::<IpAddr>()
        .ok();

    let normalized = match (bare_ip, target.rsplit_once(':')) {
        (Some(ip), _) => SocketAddr::new(ip, DEFAULT_MODBUS_PORT).to_string(),
        (None, Some((host, port))) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            return target.to_string();
        }
        (None, _) => format!("{}:{}", target, DEFAULT_MODBUS_PORT),
    };

    warn!(
        address = target,
        new_address = %normalized,
        "Cannot find address port, using default '{}'", DEFAULT_MODBUS_PORT
    );
    normalized
}

/// Read every data unit of a workload from `target`.
///
/// All-or-nothing: the first failing group or register aborts the scrape and
/// no partial results are returned. On success the returned units carry
/// their decoded values, in workload order.
pub async fn scrape_target<T>(transport: &T, target: &str, workload: Workload) -> Result<Vec<DataUnit>>
where
    T: Transport + ?Sized,
{
    let endpoint = normalize_target(target);
    let mut data_units = Vec::with_capacity(workload.unit_count());

    for (device, mut units) in workload.into_groups() {
        let values = read_remote(transport, &endpoint, &device, &units).await?;

        for (unit, value) in units.iter_mut().zip(values) {
            unit.value = value;
            debug!(
                register = %unit.name,
                value = unit.value,
                si_name = %unit.si_name,
                data_type = %unit.data_type,
                "Data unit decoded"
            );
        }
        data_units.extend(units);
    }

    Ok(data_units)
}

/// Read the given units of one device over a single connection.
///
/// Returns one decoded value per unit, in input order. The connection is
/// closed before returning, whether the reads succeeded or not.
pub async fn read_remote<T>(
    transport: &T,
    endpoint: &str,
    device: &Device,
    units: &[DataUnit],
) -> Result<Vec<f64>>
where
    T: Transport + ?Sized,
{
    debug!(
        address = endpoint,
        unit_id = device.unit_id,
        timeout = ?device.timeout,
        request_delay = ?device.request_delay,
        zero_based = device.zero_based,
        "Reading remote device"
    );

    let mut session = transport.connect(endpoint, device).await?;
    let result = read_units(session.as_mut(), endpoint, device, units).await;
    session.close().await;
    result
}

async fn read_units(
    session: &mut dyn Session,
    endpoint: &str,
    device: &Device,
    units: &[DataUnit],
) -> Result<Vec<f64>> {
    let mut values = Vec::with_capacity(units.len());

    for unit in units {
        let address = wire_address(unit, device)?;
        let count = if unit.function.is_bit_access() {
            1
        } else {
            unit.data_type.register_count()
        };

        let payload = session
            .read(unit.function, address, count)
            .await
            .map_err(|e| match e {
                SessionError::Reconnect(message) => ScrapeError::connection(endpoint, message),
                e => ScrapeError::Read {
                    address,
                    function: unit.function,
                    message: e.to_string(),
                },
            })?;

        let value = match payload {
            Payload::Registers(registers) if registers.len() < usize::from(count) => {
                return Err(ScrapeError::Read {
                    address,
                    function: unit.function,
                    message: format!(
                        "short response: expected {} registers, got {}",
                        count,
                        registers.len()
                    ),
                });
            }
            Payload::Registers(registers) => decode(
                &registers_to_bytes(&registers),
                unit.data_type,
                unit.byte_order,
                unit.word_order,
            ),
            Payload::Bits(bits) => match bits.first() {
                Some(true) => 1.0,
                Some(false) => 0.0,
                None => {
                    return Err(ScrapeError::Read {
                        address,
                        function: unit.function,
                        message: "empty response".to_string(),
                    });
                }
            },
        };

        debug!(register = %unit.name, address, function = %unit.function, value, "Register read");
        values.push(value);
    }

    Ok(values)
}

/// Address put on the wire: one lower than configured for zero-based devices.
fn wire_address(unit: &DataUnit, device: &Device) -> Result<u16> {
    if !device.zero_based {
        return Ok(unit.address);
    }

    unit.address.checked_sub(1).ok_or_else(|| ScrapeError::Read {
        address: unit.address,
        function: unit.function,
        message: "address 0 cannot be used with zero-based addressing".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ByteOrder, DataType, DeviceProfile, FunctionCode, RegisterDescriptor, WordOrder};
    use crate::workload::build_workload;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Log {
        connects: Vec<String>,
        reads: Vec<(FunctionCode, u16, u16)>,
        closed: usize,
    }

    /// In-memory device answering every read from a register map.
    #[derive(Clone, Default)]
    struct MockTransport {
        registers: HashMap<u16, u16>,
        coils: HashMap<u16, bool>,
        fail_at: Option<u16>,
        truncate: bool,
        drop_at: Option<u16>,
        refuse: bool,
        log: Arc<Mutex<Log>>,
    }

    struct MockSession {
        device: MockTransport,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, endpoint: &str, _device: &Device) -> Result<Box<dyn Session>> {
            self.log.lock().connects.push(endpoint.to_string());
            if self.refuse {
                return Err(ScrapeError::connection(endpoint, "connection refused"));
            }
            Ok(Box::new(MockSession {
                device: self.clone(),
            }))
        }
    }

    #[async_trait]
    impl Session for MockSession {
        async fn read(
            &mut self,
            function: FunctionCode,
            address: u16,
            count: u16,
        ) -> std::result::Result<Payload, SessionError> {
            self.device.log.lock().reads.push((function, address, count));

            if self.device.fail_at == Some(address) {
                return Err(SessionError::Timeout(Duration::from_millis(200)));
            }
            if self.device.drop_at == Some(address) {
                return Err(SessionError::Reconnect("connection refused".to_string()));
            }

            if function.is_bit_access() {
                return Ok(Payload::Bits(vec![
                    self.device.coils.get(&address).copied().unwrap_or(false),
                ]));
            }

            let mut registers: Vec<u16> = (address..address + count)
                .map(|a| self.device.registers.get(&a).copied().unwrap_or(0))
                .collect();
            if self.device.truncate {
                registers.pop();
            }
            Ok(Payload::Registers(registers))
        }

        async fn close(&mut self) {
            self.device.log.lock().closed += 1;
        }
    }

    fn unit(name: &str, address: u16, data_type: DataType, function: FunctionCode) -> DataUnit {
        DataUnit {
            name: name.to_string(),
            address,
            value: 0.0,
            si_name: "voltage".to_string(),
            data_type,
            byte_order: ByteOrder::BigEndian,
            word_order: WordOrder::None,
            function,
            labels: BTreeMap::new(),
        }
    }

    fn device(zero_based: bool) -> Device {
        Device {
            unit_id: 1,
            timeout: Duration::from_millis(200),
            request_delay: Duration::from_millis(1000),
            zero_based,
        }
    }

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("10.0.0.1:1502"), "10.0.0.1:1502");
        assert_eq!(normalize_target("10.0.0.1"), "10.0.0.1:502");
        assert_eq!(normalize_target("plc.local"), "plc.local:502");
        assert_eq!(normalize_target("plc.local:5020"), "plc.local:5020");
        assert_eq!(normalize_target("[::1]:1502"), "[::1]:1502");
        assert_eq!(normalize_target("::1"), "[::1]:502");
        assert_eq!(normalize_target("[fe80::1]"), "[fe80::1]:502");
    }

    #[tokio::test]
    async fn test_zero_based_adjustment() {
        let transport = MockTransport::default();
        let units = [unit("QF1", 331, DataType::Word, FunctionCode::ReadInputRegisters)];

        read_remote(&transport, "plc:502", &device(true), &units)
            .await
            .unwrap();
        read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap();

        let log = transport.log.lock();
        assert_eq!(log.reads[0].1, 330);
        assert_eq!(log.reads[1].1, 331);
    }

    #[tokio::test]
    async fn test_zero_based_address_zero_is_rejected() {
        let transport = MockTransport::default();
        let units = [unit("QF1", 0, DataType::Word, FunctionCode::ReadInputRegisters)];

        let err = read_remote(&transport, "plc:502", &device(true), &units)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Read { address: 0, .. }));
        assert_eq!(transport.log.lock().closed, 1);
    }

    #[tokio::test]
    async fn test_function_dispatch_and_lengths() {
        let transport = MockTransport::default();
        let units = [
            unit("a", 1, DataType::Word, FunctionCode::ReadHoldingRegisters),
            unit("b", 2, DataType::Dword, FunctionCode::ReadInputRegisters),
            unit("c", 4, DataType::Int32, FunctionCode::ReadHoldingRegisters),
            unit("d", 6, DataType::Uint32, FunctionCode::ReadCoils),
            unit("e", 7, DataType::Word, FunctionCode::ReadDiscreteInputs),
        ];

        read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap();

        let log = transport.log.lock();
        assert_eq!(
            log.reads,
            vec![
                (FunctionCode::ReadHoldingRegisters, 1, 1),
                (FunctionCode::ReadInputRegisters, 2, 2),
                (FunctionCode::ReadHoldingRegisters, 4, 2),
                (FunctionCode::ReadCoils, 6, 1),
                (FunctionCode::ReadDiscreteInputs, 7, 1),
            ]
        );
        assert_eq!(log.connects, vec!["plc:502"]);
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_values_decoded_in_order() {
        let transport = MockTransport {
            registers: HashMap::from([(10, 0xFFF6), (20, 0x0001), (21, 0x0569)]),
            coils: HashMap::from([(5, true)]),
            ..Default::default()
        };
        let units = [
            unit("neg", 10, DataType::Int16, FunctionCode::ReadInputRegisters),
            unit("wide", 20, DataType::Uint32, FunctionCode::ReadHoldingRegisters),
            unit("coil", 5, DataType::Word, FunctionCode::ReadCoils),
            unit("off", 6, DataType::Word, FunctionCode::ReadCoils),
        ];

        let values = read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap();
        assert_eq!(values, vec![-10.0, 66921.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_read_failure_is_all_or_nothing() {
        let transport = MockTransport {
            fail_at: Some(3),
            ..Default::default()
        };
        let units: Vec<_> = (1..=5)
            .map(|a| unit(&format!("r{a}"), a, DataType::Word, FunctionCode::ReadInputRegisters))
            .collect();

        let err = read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Read { address: 3, .. }));
        let log = transport.log.lock();
        assert_eq!(log.reads.len(), 3);
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_short_register_response_fails_read() {
        let transport = MockTransport {
            registers: HashMap::from([(20, 0x1234), (21, 0x5678)]),
            truncate: true,
            ..Default::default()
        };
        let units = [unit("wide", 20, DataType::Uint32, FunctionCode::ReadHoldingRegisters)];

        let err = read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap_err();

        match err {
            ScrapeError::Read {
                address,
                function,
                message,
            } => {
                assert_eq!(address, 20);
                assert_eq!(function, FunctionCode::ReadHoldingRegisters);
                assert!(message.contains("expected 2 registers, got 1"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.log.lock().closed, 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_a_connection_error() {
        let transport = MockTransport {
            drop_at: Some(2),
            ..Default::default()
        };
        let units = [
            unit("a", 1, DataType::Word, FunctionCode::ReadInputRegisters),
            unit("b", 2, DataType::Word, FunctionCode::ReadInputRegisters),
        ];

        let err = read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "connection");
        assert!(err.to_string().contains("plc:502"));
        assert_eq!(transport.log.lock().closed, 1);
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let transport = MockTransport {
            refuse: true,
            ..Default::default()
        };
        let units = [unit("a", 1, DataType::Word, FunctionCode::ReadInputRegisters)];

        let err = read_remote(&transport, "plc:502", &device(false), &units)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "connection");
        assert!(transport.log.lock().reads.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_target_fills_values() {
        let transport = MockTransport {
            registers: HashMap::from([(330, 42), (350, 7)]),
            ..Default::default()
        };
        let profile = DeviceProfile {
            device_modbus_id: 1,
            device_zero_based_addressing: true,
            device_registers: vec![
                RegisterDescriptor {
                    register_name: "QF1".into(),
                    register_address: "dec#331".into(),
                    ..Default::default()
                },
                RegisterDescriptor {
                    register_name: "QF2".into(),
                    register_address: "hex#15F".into(),
                    register_func_code: Some(FunctionCode::ReadHoldingRegisters),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let workload = build_workload(&profile).unwrap();
        let units = scrape_target(&transport, "10.0.0.5", workload).await.unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "QF1");
        assert_eq!(units[0].value, 42.0);
        assert_eq!(units[1].name, "QF2");
        assert_eq!(units[1].value, 7.0);
        assert_eq!(transport.log.lock().connects, vec!["10.0.0.5:502"]);
    }
}
