//! One-time startup: enumerate, open, and describe the traced cores.
//!
//! Any failure here is a `TraceError::Setup` (or `Config`/`Protocol`) and
//! aborts before the polling loop starts. Unlike steady-state polling there
//! is no reconnection: the target must be reachable when tracing begins.

use tracing::{error, info, warn};

use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::monitor::classify::{classify, event_notices, FatalReason, Verdict};
use crate::monitor::link::CoreLink;
use crate::scheduler::CoreSlot;
use crate::sink::{output_path, LineSink};
use crate::transport::{DebugTransport, Reply};
use crate::types::{CoreConnInfo, CoreHandle, RegisterInfo};

/// Log the events behind a non-`Done` setup reply, then classify it.
///
/// Event notices are logged before classification, as during polling.
/// Returns the error that ends setup, or `None` if setup may go on.
fn settle(
    transport: &mut dyn DebugTransport,
    core: &str,
    handle: Option<CoreHandle>,
    status: Reply<()>,
    what: &str,
) -> Option<TraceError> {
    let info = transport.error_info(handle);
    for notice in event_notices(info.events) {
        warn!(core = %core, "EVENT: {}", notice);
    }
    match classify(&status, &info) {
        Verdict::NoError | Verdict::Event(_) => None,
        Verdict::Fatal(FatalReason::UnrecognizedEvent(bits)) => {
            error!(core = %core, bits, "EVENT: unknown event");
            Some(TraceError::UnrecognizedEvent {
                core: core.to_string(),
                bits,
            })
        }
        Verdict::Fatal(FatalReason::EmptyErrorMessage) => Some(TraceError::Setup(what.to_string())),
        Verdict::ConnectionLost { message } | Verdict::HandleError { message, .. } => {
            error!(core = %core, "ERROR: {}", message);
            Some(TraceError::Setup(format!("{}: {}", what, message)))
        }
    }
}

/// Settle a setup reply: events are logged and accepted, errors are fatal.
fn expect_reply<T>(
    transport: &mut dyn DebugTransport,
    core: &str,
    handle: Option<CoreHandle>,
    reply: Reply<T>,
    what: &str,
) -> Result<T, TraceError> {
    match reply {
        Reply::Done(value) => Ok(value),
        Reply::Event(value) => match settle(transport, core, handle, Reply::Event(()), what) {
            None => Ok(value),
            Some(e) => Err(e),
        },
        Reply::Error => Err(settle(transport, core, handle, Reply::Error, what)
            .unwrap_or_else(|| TraceError::Setup(what.to_string()))),
    }
}

/// Close a handle that will not be handed to the scheduler.
fn release(transport: &mut dyn DebugTransport, core: &str, handle: CoreHandle) {
    if transport.close_core(handle).is_error() {
        let err_info = transport.error_info(Some(handle));
        warn!(core = %core, "failed to close core: {}", err_info.message);
    }
}

/// Cores of the configured device, in enumeration order.
pub fn discover_cores(
    transport: &mut dyn DebugTransport,
    config: &TraceConfig,
) -> Result<Vec<CoreConnInfo>, TraceError> {
    let device = format!("{}/device{}", config.host, config.device_index);
    let reply = transport.query_cores(&config.host, config.device_index);
    let mut cores = expect_reply(
        transport,
        &device,
        None,
        reply,
        &format!("cannot enumerate cores of {}", device),
    )?;
    if cores.is_empty() {
        return Err(TraceError::Setup(format!("{} has no cores", device)));
    }
    if config.single_core {
        cores.truncate(1);
    }
    Ok(cores)
}

/// Open a core for the first time.
///
/// A handle whose open reply carries a fatal event is closed again.
pub fn open_core(transport: &mut dyn DebugTransport, info: &CoreConnInfo) -> Result<CoreHandle, TraceError> {
    let what = format!("cannot open {}", info);
    match transport.open_core(info) {
        Reply::Done(handle) => Ok(handle),
        Reply::Event(handle) => match settle(transport, &info.core, Some(handle), Reply::Event(()), &what) {
            None => Ok(handle),
            Some(e) => {
                release(transport, &info.core, handle);
                Err(e)
            }
        },
        Reply::Error => expect_reply(transport, &info.core, None, Reply::<CoreHandle>::Error, &what),
    }
}

/// Find the instruction-pointer register (`PC` or `IP`) in a register group.
pub fn resolve_ip_register(
    transport: &mut dyn DebugTransport,
    core: &str,
    handle: CoreHandle,
    group_id: u32,
) -> Result<RegisterInfo, TraceError> {
    let reply = transport.register_map(handle, group_id);
    let registers = expect_reply(
        transport,
        core,
        Some(handle),
        reply,
        &format!("cannot read register group {} of {}", group_id, core),
    )?;
    let register = registers
        .into_iter()
        .find(RegisterInfo::is_instruction_pointer)
        .ok_or_else(|| {
            TraceError::Setup(format!("no PC or IP register in register group {} of {}", group_id, core))
        })?;
    if register.width_bits != 16 && register.width_bits != 32 {
        return Err(TraceError::Protocol(format!(
            "instruction pointer register {} has unsupported width {}",
            register.name, register.width_bits
        )));
    }
    Ok(register)
}

/// Enumerate and open every traced core.
///
/// On failure, every handle opened so far is closed again before returning.
pub fn attach(transport: &mut dyn DebugTransport, config: &TraceConfig) -> Result<Vec<CoreLink>, TraceError> {
    config.validate()?;
    let cores = discover_cores(transport, config)?;
    let mut links: Vec<CoreLink> = Vec::with_capacity(cores.len());

    for info in cores {
        let attached = open_core(transport, &info).and_then(|handle| {
            match resolve_ip_register(transport, &info.core, handle, config.register_group) {
                Ok(register) => Ok(CoreLink::new(info.clone(), handle, register)),
                Err(e) => {
                    release(transport, &info.core, handle);
                    Err(e)
                }
            }
        });
        match attached {
            Ok(link) => {
                info!(
                    core = %link.info(),
                    register = %link.ip_register().name,
                    address = link.ip_register().address,
                    "core attached"
                );
                links.push(link);
            }
            Err(e) => {
                for link in links.iter_mut() {
                    link.close(transport);
                }
                return Err(e);
            }
        }
    }
    Ok(links)
}

/// Pair every link with a file sink at `<prefix>core<i>.txt`.
pub fn open_outputs(links: Vec<CoreLink>, config: &TraceConfig) -> Result<Vec<CoreSlot>, TraceError> {
    links
        .into_iter()
        .enumerate()
        .map(|(i, link)| -> Result<CoreSlot, TraceError> {
            let path = output_path(&config.output_prefix, i);
            let sink = LineSink::create(&path, config.append).map_err(|e| {
                TraceError::Setup(format!("cannot open output file '{}': {}", path.display(), e))
            })?;
            info!(core = %link.name(), path = %path.display(), "writing trace output");
            Ok(CoreSlot::new(link, Box::new(sink)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::link::LinkState;
    use crate::transport::mock::{CallKind, FaultReply, MockTransport, MOCK_PC_ADDRESS};
    use crate::transport::{ErrorCode, ErrorInfo};

    #[test]
    fn attach_opens_every_core() {
        let mut mock = MockTransport::with_cores(3);
        let links = attach(&mut mock, &TraceConfig::default()).unwrap();

        assert_eq!(links.len(), 3);
        let names: Vec<&str> = links.iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["core0", "core1", "core2"]);
        assert!(links.iter().all(|l| l.state() == LinkState::Connected));
        assert_eq!(links[1].ip_register().address, MOCK_PC_ADDRESS);
        assert_eq!(mock.open_handles(), 3);
    }

    #[test]
    fn single_core_traces_first_only() {
        let mut mock = MockTransport::with_cores(4);
        let config = TraceConfig {
            single_core: true,
            ..TraceConfig::default()
        };
        let links = attach(&mut mock, &config).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].name(), "core0");
        assert_eq!(mock.count(CallKind::Open), 1);
    }

    #[test]
    fn no_cores_is_setup_failure() {
        let mut mock = MockTransport::new();
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(err.is_setup());
        assert!(err.to_string().contains("no cores"));
    }

    #[test]
    fn enumeration_error_is_setup_failure() {
        let mut mock = MockTransport::with_cores(1);
        mock.push_fault(
            CallKind::QueryCores,
            None,
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Connection, "server not reachable"),
        );
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(err.is_setup());
        assert!(err.to_string().contains("server not reachable"));
    }

    #[test]
    fn open_failure_closes_earlier_cores() {
        let mut mock = MockTransport::with_cores(3);
        mock.push_fault(
            CallKind::Open,
            Some(2),
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Other(7), "core is locked"),
        );
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(err.to_string().contains("core is locked"));
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn open_event_is_accepted() {
        let mut mock = MockTransport::with_cores(1);
        mock.push_fault(CallKind::Open, Some(0), FaultReply::Event, ErrorInfo::events(0x1));
        let links = attach(&mut mock, &TraceConfig::default()).unwrap();
        assert_eq!(links.len(), 1);
        // Event info is looked up against the new handle.
        assert_eq!(mock.count_for(CallKind::ErrorInfo, 0), 1);
    }

    #[test]
    fn open_event_with_unknown_bits_closes_new_handle() {
        let mut mock = MockTransport::with_cores(2);
        mock.push_fault(CallKind::Open, Some(1), FaultReply::Event, ErrorInfo::events(0x1 | 0x10));

        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();

        match err {
            TraceError::UnrecognizedEvent { core, bits } => {
                assert_eq!(core, "core1");
                assert_eq!(bits, 0x10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn error_reply_with_unknown_bits_is_unrecognized_event() {
        let mut mock = MockTransport::with_cores(1);
        mock.push_fault(
            CallKind::QueryCores,
            None,
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Connection, "server not reachable").with_events(0x20),
        );
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(matches!(err, TraceError::UnrecognizedEvent { bits: 0x20, .. }));
    }

    #[test]
    fn register_map_error_with_mixed_bits_closes_handle() {
        let mut mock = MockTransport::with_cores(1);
        mock.push_fault(
            CallKind::RegisterMap,
            Some(0),
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Other(4), "group unavailable").with_events(0x1 | 0x40),
        );
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        match err {
            TraceError::UnrecognizedEvent { core, bits } => {
                assert_eq!(core, "core0");
                assert_eq!(bits, 0x40);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn register_map_error_with_known_events_is_setup_failure() {
        let mut mock = MockTransport::with_cores(1);
        mock.push_fault(
            CallKind::RegisterMap,
            Some(0),
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Other(4), "group unavailable").with_events(0x1),
        );
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(err.is_setup());
        assert!(err.to_string().contains("group unavailable"));
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn failed_release_is_reported() {
        let mut mock = MockTransport::with_cores(1);
        mock.set_registers(0, vec![RegisterInfo::new("PSW", 0x10, 32, 0)]);
        mock.push_fault(
            CallKind::Close,
            Some(0),
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Other(9), "core busy"),
        );
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(err.is_setup());
        assert_eq!(mock.count_for(CallKind::Close, 0), 1);
        assert_eq!(mock.count_for(CallKind::ErrorInfo, 0), 1);
    }

    #[test]
    fn missing_ip_register_fails() {
        let mut mock = MockTransport::with_cores(1);
        mock.set_registers(0, vec![RegisterInfo::new("PSW", 0x10, 32, 0)]);
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(err.is_setup());
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn ip_register_resolved_from_configured_group() {
        let mut mock = MockTransport::with_cores(1);
        mock.set_registers(
            0,
            vec![
                RegisterInfo::new("PC", 0x10, 32, 0),
                RegisterInfo::new("IP", 0x20, 16, 1),
            ],
        );
        let config = TraceConfig {
            register_group: 1,
            ..TraceConfig::default()
        };
        let links = attach(&mut mock, &config).unwrap();
        assert_eq!(links[0].ip_register().name, "IP");
        assert_eq!(links[0].ip_register().width_bits, 16);
    }

    #[test]
    fn wide_ip_register_is_protocol_error() {
        let mut mock = MockTransport::with_cores(1);
        mock.set_registers(0, vec![RegisterInfo::new("PC", 0x10, 64, 0)]);
        let err = attach(&mut mock, &TraceConfig::default()).unwrap_err();
        assert!(matches!(err, TraceError::Protocol(_)));
    }

    #[test]
    fn invalid_config_rejected_before_transport_use() {
        let mut mock = MockTransport::with_cores(1);
        let mut config = TraceConfig::default();
        config.ring.capacity = 0;
        assert!(matches!(attach(&mut mock, &config), Err(TraceError::Config(_))));
        assert!(mock.calls.is_empty());
    }

    #[test]
    fn outputs_are_created_per_core() {
        let dir = std::env::temp_dir().join(format!("ringtrace-setup-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let mut mock = MockTransport::with_cores(2);
        let config = TraceConfig {
            output_prefix: format!("{}/t_", dir.display()),
            ..TraceConfig::default()
        };

        let links = attach(&mut mock, &config).unwrap();
        let slots = open_outputs(links, &config).unwrap();

        assert_eq!(slots.len(), 2);
        assert!(dir.join("t_core0.txt").exists());
        assert!(dir.join("t_core1.txt").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
