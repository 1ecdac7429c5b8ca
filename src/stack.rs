//! Stack construction, running and shutdown
//!
//! [`StackBuilder`] is the registration phase: devices, protocols,
//! interfaces, routes, timers and event subscribers are added through
//! `&mut self`. [`StackBuilder::run`] freezes everything into a shared
//! [`Stack`], starts the softirq consumer thread and opens every device.
//! Nothing can be registered once the stack is running.

use std::net::Ipv4Addr;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::StackConfig;
use crate::device::{Device, DeviceId, DeviceRegistry};
use crate::error::{NetError, Result};
use crate::iface::ip::{AddressResolver, IpIface, IpLayer};
use crate::iface::ipv4;
use crate::intr::{self, Irq, IrqSender, SoftirqContext};
use crate::network::addr::parse_addr;
use crate::protocol::{ether_type, ProtocolTable, RxHandle};
use crate::timer::{EventList, TimerList};

pub struct StackBuilder {
    config: StackConfig,
    devices: DeviceRegistry,
    protocols: ProtocolTable,
    ip: IpLayer,
    timers: TimerList<Stack>,
    events: EventList<Stack>,
}

impl StackBuilder {
    /// A stack with the IPv4 input handler already registered.
    pub fn new(config: StackConfig) -> Result<Self> {
        let mut builder = StackBuilder {
            protocols: ProtocolTable::new(config.queue_capacity),
            config,
            devices: DeviceRegistry::default(),
            ip: IpLayer::new(),
            timers: TimerList::default(),
            events: EventList::default(),
        };
        builder.protocol_register(ether_type::IP, ipv4::input)?;
        info!("initialized");
        Ok(builder)
    }

    pub fn device_register(&mut self, dev: Device) -> Result<DeviceId> {
        self.devices.register(dev)
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Register a link-layer protocol handler. Types are unique.
    pub fn protocol_register<F>(&mut self, ty: u16, handler: F) -> Result<()>
    where
        F: Fn(&Stack, &[u8], &Device) + Send + Sync + 'static,
    {
        self.protocols.register(ty, Box::new(handler))
    }

    /// Attach an IPv4 interface to `dev` and add its connected route.
    pub fn ip_iface_register(&mut self, dev: DeviceId, iface: IpIface) -> Result<Arc<IpIface>> {
        let device = self.devices.get_mut(dev).ok_or(NetError::UnknownDevice(dev))?;
        self.ip.iface_register(device, iface)
    }

    /// Register an upper-layer handler for IP protocol number `proto`.
    pub fn ip_protocol_register<F>(&mut self, proto: u8, handler: F) -> Result<()>
    where
        F: Fn(&Stack, &[u8], Ipv4Addr, Ipv4Addr, &Arc<IpIface>) + Send + Sync + 'static,
    {
        self.ip.protocol_register(proto, Box::new(handler))
    }

    pub fn route_add(
        &mut self,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
        nexthop: Option<Ipv4Addr>,
        iface: &Arc<IpIface>,
    ) -> Result<()> {
        self.ip
            .routes_mut()
            .add(network, netmask, nexthop, Arc::clone(iface))
    }

    /// Install `0.0.0.0/0` via `gateway` on `iface`.
    pub fn route_set_default_gateway(&mut self, iface: &Arc<IpIface>, gateway: &str) -> Result<()> {
        let gateway = parse_addr(gateway).map_err(|e| {
            error!("bad gateway address, addr={gateway}");
            NetError::Addr(e)
        })?;
        self.route_add(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, Some(gateway), iface)
    }

    pub fn set_resolver<R: AddressResolver + 'static>(&mut self, resolver: R) {
        self.ip.set_resolver(Box::new(resolver));
    }

    pub fn timer_register<F>(&mut self, interval: Duration, handler: F) -> Result<()>
    where
        F: FnMut(&Stack) + Send + 'static,
    {
        self.timers.register(interval, Box::new(handler))
    }

    /// Subscribe to events raised with [`Stack::raise_event`]. Any argument
    /// the handler needs is captured by the closure.
    pub fn event_subscribe<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(&Stack) + Send + 'static,
    {
        self.events.subscribe(Box::new(handler))
    }

    pub fn run(self) -> Result<RunningStack> {
        let (irq, irqs) = intr::channel();
        let thread_name = self.config.thread_name.clone();
        let stack = Arc::new(Stack {
            config: self.config,
            devices: self.devices,
            protocols: Arc::new(self.protocols),
            ip: self.ip,
            irq,
        });

        let consumer = SoftirqContext::new(Arc::clone(&stack), irqs, self.timers, self.events)
            .spawn(&thread_name)?;

        debug!("open all devices...");
        for dev in stack.devices() {
            let rx = RxHandle::new(dev, Arc::clone(&stack.protocols), stack.irq.clone());
            if let Err(e) = dev.open(rx) {
                error!("failed to open dev={}: {e}", dev.name());
            }
        }
        debug!("running...");

        Ok(RunningStack {
            stack,
            consumer: Some(consumer),
        })
    }
}

/// Everything registered before the stack started, shared with the
/// softirq consumer and with every driver thread.
pub struct Stack {
    config: StackConfig,
    devices: DeviceRegistry,
    protocols: Arc<ProtocolTable>,
    ip: IpLayer,
    irq: IrqSender,
}

impl Stack {
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn ip(&self) -> &IpLayer {
        &self.ip
    }

    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    /// Receive path for device `id`, the same handle its driver got on open.
    pub fn rx_handle(&self, id: DeviceId) -> Option<RxHandle> {
        let dev = self.device(id)?;
        Some(RxHandle::new(dev, Arc::clone(&self.protocols), self.irq.clone()))
    }

    pub fn ip_iface_select(&self, addr: Ipv4Addr) -> Option<&Arc<IpIface>> {
        self.ip.iface_select(addr)
    }

    pub fn ip_route_get_iface(&self, dst: Ipv4Addr) -> Option<&Arc<IpIface>> {
        self.ip.routes().lookup(dst).map(|route| &route.iface)
    }

    /// Wake the softirq context to call every event subscriber once.
    pub fn raise_event(&self) {
        self.irq.raise(Irq::Event);
    }
}

/// A started stack. Shut down explicitly with [`RunningStack::shutdown`],
/// or implicitly when dropped.
pub struct RunningStack {
    stack: Arc<Stack>,
    consumer: Option<JoinHandle<()>>,
}

impl RunningStack {
    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(consumer) = self.consumer.take() else {
            return;
        };

        debug!("close all devices...");
        for dev in self.stack.devices() {
            if let Err(e) = dev.close() {
                warn!("failed to close dev={}: {e}", dev.name());
            }
        }

        self.stack.irq.raise(Irq::Shutdown);
        if consumer.join().is_err() {
            error!("softirq context panicked");
        }

        let discarded = self.stack.protocols.discard_pending();
        if discarded > 0 {
            debug!("discarded {discarded} pending entries");
        }
        debug!("shutting down");
    }
}

impl Deref for RunningStack {
    type Target = Stack;

    fn deref(&self) -> &Stack {
        &self.stack
    }
}

impl Drop for RunningStack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceFlags, DeviceType, Driver, HwAddr};
    use crate::iface::{IpOutput, Resolution};
    use crate::network::icmp::{self, IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
    use crate::network::ipv4::{build_datagram, flags, protocol, Ipv4Header};
    use crate::network::checksum;
    use byteorder::{BigEndian, ByteOrder};
    use std::io;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Mutex;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(2);
    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    #[derive(Debug, Clone)]
    struct Frame {
        data: Vec<u8>,
        dst: Option<HwAddr>,
    }

    /// Records every transmitted frame and optionally loops it back.
    #[derive(Clone, Default)]
    struct Wire {
        frames: Arc<Mutex<Vec<Frame>>>,
        rx: Arc<Mutex<Option<RxHandle>>>,
        loop_back: bool,
    }

    impl Wire {
        fn looped() -> Self {
            Wire {
                loop_back: true,
                ..Default::default()
            }
        }

        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl Driver for Wire {
        fn open(&self, _dev: &Device, rx: RxHandle) -> io::Result<()> {
            *self.rx.lock().unwrap() = Some(rx);
            Ok(())
        }

        fn close(&self, _dev: &Device) -> io::Result<()> {
            self.rx.lock().unwrap().take();
            Ok(())
        }

        fn transmit(&self, _dev: &Device, ty: u16, data: &[u8], dst: Option<&HwAddr>) -> io::Result<()> {
            self.frames.lock().unwrap().push(Frame {
                data: data.to_vec(),
                dst: dst.copied(),
            });
            if self.loop_back {
                if let Some(rx) = self.rx.lock().unwrap().as_ref() {
                    rx.input(ty, data).map_err(io::Error::other)?;
                }
            }
            Ok(())
        }
    }

    enum Answer {
        Resolve(HwAddr),
        Pending,
        Fail,
    }

    struct FixedResolver {
        answer: Answer,
        asked: Arc<Mutex<Vec<Ipv4Addr>>>,
    }

    impl AddressResolver for FixedResolver {
        fn resolve(&self, _stack: &Stack, _dev: &Device, _iface: &IpIface, target: Ipv4Addr) -> Result<Resolution> {
            self.asked.lock().unwrap().push(target);
            match self.answer {
                Answer::Resolve(addr) => Ok(Resolution::Resolved(addr)),
                Answer::Pending => Ok(Resolution::Pending),
                Answer::Fail => Err(NetError::ResolveFailed(target)),
            }
        }
    }

    type Delivery = (Vec<u8>, Ipv4Addr, Ipv4Addr);

    fn wire_device(wire: &Wire, mtu: usize, flags: DeviceFlags) -> Device {
        Device::new(DeviceType::Ethernet, mtu, flags, Box::new(wire.clone()))
            .with_hw_addr(HwAddr::new(&[0x02, 0, 0, 0, 0, 1]))
            .with_broadcast(HwAddr::new(&[0xff; 6]))
    }

    /// Builder with one wire device carrying 192.168.1.1/24 and a UDP
    /// handler forwarding deliveries to the returned channel.
    fn udp_setup(wire: &Wire, mtu: usize, flags: DeviceFlags) -> (StackBuilder, DeviceId, Arc<IpIface>, Receiver<Delivery>) {
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        let dev = builder.device_register(wire_device(wire, mtu, flags)).unwrap();
        let iface = builder.ip_iface_register(dev, IpIface::new(LOCAL, NETMASK)).unwrap();
        let (tx, rx) = mpsc::channel();
        builder
            .ip_protocol_register(
                protocol::UDP,
                move |_: &Stack, data: &[u8], src: Ipv4Addr, dst: Ipv4Addr, _: &Arc<IpIface>| {
                    let _ = tx.send((data.to_vec(), src, dst));
                },
            )
            .unwrap();
        (builder, dev, iface, rx)
    }

    fn datagram(dst: Ipv4Addr, payload: &[u8], flags_frag_offset: u16) -> Vec<u8> {
        let mut header = Ipv4Header::new(protocol::UDP, Ipv4Addr::new(192, 168, 1, 7), dst, payload.len() as u16, 1);
        header.flags_frag_offset = flags_frag_offset;
        header.fill_checksum();
        build_datagram(&header, payload).unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_end_to_end_loopback_delivery() {
        let wire = Wire::looped();
        let (builder, _, _, deliveries) = udp_setup(&wire, 1500, DeviceFlags::LOOPBACK);
        let running = builder.run().unwrap();

        let sent = running.ip_output(protocol::UDP, b"hi", LOCAL, LOCAL).unwrap();
        assert_eq!(sent, IpOutput::Sent(2));

        assert_eq!(deliveries.recv_timeout(TIMEOUT).unwrap(), (b"hi".to_vec(), LOCAL, LOCAL));

        let frames = wire.frames();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0].data;
        assert_eq!(frame.len(), 22);
        let header = Ipv4Header::parse(frame).unwrap();
        assert!(header.verify_checksum(frame));
        assert_eq!(header.ttl, 255);
        assert_eq!(header.id, 128);
        assert_eq!(header.protocol, protocol::UDP);
        assert_eq!(frames[0].dst, None);
        running.shutdown();
    }

    #[test]
    fn test_unspecified_source_uses_interface_address() {
        let wire = Wire::looped();
        let (builder, _, _, deliveries) = udp_setup(&wire, 1500, DeviceFlags::LOOPBACK);
        let running = builder.run().unwrap();

        let sent = running.ip_output(protocol::UDP, b"anon", Ipv4Addr::UNSPECIFIED, LOCAL).unwrap();
        assert_eq!(sent, IpOutput::Sent(4));
        let (_, src, _) = deliveries.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(src, LOCAL);
        running.shutdown();
    }

    #[test]
    fn test_broadcast_requires_source_before_route_lookup() {
        // no interfaces at all, so any route lookup would fail with NoRoute
        let running = StackBuilder::new(StackConfig::default()).unwrap().run().unwrap();
        assert!(matches!(
            running.ip_output(protocol::ICMP, b"x", Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST),
            Err(NetError::SourceRequired)
        ));
        assert!(matches!(
            running.ip_output(protocol::ICMP, b"x", LOCAL, Ipv4Addr::BROADCAST),
            Err(NetError::NoRoute(_))
        ));
        running.shutdown();
    }

    #[test]
    fn test_mtu_rejection_skips_transmit() {
        let wire = Wire::default();
        let (builder, _, _, _) = udp_setup(&wire, 100, DeviceFlags::empty());
        let running = builder.run().unwrap();

        let dst = Ipv4Addr::new(192, 168, 1, 2);
        assert!(matches!(
            running.ip_output(protocol::UDP, &[0u8; 81], LOCAL, dst),
            Err(NetError::TooLong { mtu: 100, len: 101, .. })
        ));
        assert!(wire.frames().is_empty());

        assert_eq!(running.ip_output(protocol::UDP, &[0u8; 80], LOCAL, dst).unwrap(), IpOutput::Sent(80));
        assert_eq!(wire.frames().len(), 1);
        assert_eq!(wire.frames()[0].data.len(), 100);
        running.shutdown();
    }

    #[test]
    fn test_route_and_source_errors() {
        let wire = Wire::default();
        let (builder, _, _, _) = udp_setup(&wire, 1500, DeviceFlags::empty());
        let running = builder.run().unwrap();

        assert!(matches!(
            running.ip_output(protocol::UDP, b"x", LOCAL, Ipv4Addr::new(10, 0, 0, 1)),
            Err(NetError::NoRoute(_))
        ));
        assert!(matches!(
            running.ip_output(protocol::UDP, b"x", Ipv4Addr::new(192, 168, 1, 9), Ipv4Addr::new(192, 168, 1, 2)),
            Err(NetError::WrongSource(_))
        ));
        assert!(wire.frames().is_empty());
        running.shutdown();
    }

    #[test]
    fn test_inbound_drops() {
        let wire = Wire::default();
        let (builder, dev, _, deliveries) = udp_setup(&wire, 1500, DeviceFlags::empty());
        let running = builder.run().unwrap();
        let rx = running.rx_handle(dev).unwrap();

        // total length beyond what arrived
        let mut truncated = datagram(LOCAL, b"lost", 0);
        BigEndian::write_u16(&mut truncated[2..4], 200);
        BigEndian::write_u16(&mut truncated[10..12], 0);
        let sum = checksum(&truncated[..20]);
        BigEndian::write_u16(&mut truncated[10..12], sum);
        rx.input(ether_type::IP, &truncated).unwrap();

        // fragments
        rx.input(ether_type::IP, &datagram(LOCAL, b"frag", 1)).unwrap();
        rx.input(ether_type::IP, &datagram(LOCAL, b"more", flags::MORE_FRAGMENTS)).unwrap();

        // bad checksum
        let mut corrupted = datagram(LOCAL, b"sum", 0);
        corrupted[8] ^= 0xff;
        rx.input(ether_type::IP, &corrupted).unwrap();

        // not addressed to us
        rx.input(ether_type::IP, &datagram(Ipv4Addr::new(192, 168, 1, 2), b"other", 0)).unwrap();

        // unknown protocol type at the link layer
        rx.input(ether_type::IPV6, &datagram(LOCAL, b"v6", 0)).unwrap();

        rx.input(ether_type::IP, &datagram(LOCAL, b"ok", 0)).unwrap();
        rx.input(ether_type::IP, &datagram(Ipv4Addr::new(192, 168, 1, 255), b"subnet", 0)).unwrap();
        rx.input(ether_type::IP, &datagram(Ipv4Addr::BROADCAST, b"all", 0)).unwrap();

        let src = Ipv4Addr::new(192, 168, 1, 7);
        assert_eq!(deliveries.recv_timeout(TIMEOUT).unwrap(), (b"ok".to_vec(), src, LOCAL));
        assert_eq!(
            deliveries.recv_timeout(TIMEOUT).unwrap(),
            (b"subnet".to_vec(), src, Ipv4Addr::new(192, 168, 1, 255))
        );
        assert_eq!(
            deliveries.recv_timeout(TIMEOUT).unwrap(),
            (b"all".to_vec(), src, Ipv4Addr::BROADCAST)
        );
        assert!(deliveries.recv_timeout(Duration::from_millis(50)).is_err());
        running.shutdown();
    }

    #[test]
    fn test_payload_excludes_trailing_padding() {
        let wire = Wire::default();
        let (builder, dev, _, deliveries) = udp_setup(&wire, 1500, DeviceFlags::empty());
        let running = builder.run().unwrap();

        let mut padded = datagram(LOCAL, b"data", 0);
        padded.extend_from_slice(&[0u8; 6]);
        running.rx_handle(dev).unwrap().input(ether_type::IP, &padded).unwrap();
        assert_eq!(deliveries.recv_timeout(TIMEOUT).unwrap().0, b"data".to_vec());
        running.shutdown();
    }

    #[test]
    fn test_broadcast_uses_device_broadcast_address() {
        let wire = Wire::default();
        let (builder, _, _, _) = udp_setup(&wire, 1500, DeviceFlags::NEED_ARP | DeviceFlags::BROADCAST);
        let running = builder.run().unwrap();

        let sent = running
            .ip_output(protocol::UDP, b"x", LOCAL, Ipv4Addr::new(192, 168, 1, 255))
            .unwrap();
        assert_eq!(sent, IpOutput::Sent(1));
        assert_eq!(wire.frames()[0].dst, Some(HwAddr::new(&[0xff; 6])));

        let sent = running.ip_output(protocol::UDP, b"x", LOCAL, Ipv4Addr::BROADCAST);
        assert!(matches!(sent, Err(NetError::NoRoute(_))));
        running.shutdown();
    }

    #[test]
    fn test_resolution_outcomes() {
        let peer = Ipv4Addr::new(192, 168, 1, 2);
        let hw = HwAddr::new(&[0x02, 0, 0, 0, 0, 2]);

        let wire = Wire::default();
        let (builder, _, _, _) = udp_setup(&wire, 1500, DeviceFlags::NEED_ARP);
        let running = builder.run().unwrap();
        assert!(matches!(
            running.ip_output(protocol::UDP, b"x", LOCAL, peer),
            Err(NetError::NoResolver(_))
        ));
        running.shutdown();

        for (answer, expect_frame) in [
            (Answer::Resolve(hw), true),
            (Answer::Pending, false),
            (Answer::Fail, false),
        ] {
            let wire = Wire::default();
            let (mut builder, _, _, _) = udp_setup(&wire, 1500, DeviceFlags::NEED_ARP);
            let asked = Arc::new(Mutex::new(Vec::new()));
            let failing = matches!(answer, Answer::Fail);
            let pending = matches!(answer, Answer::Pending);
            builder.set_resolver(FixedResolver {
                answer,
                asked: Arc::clone(&asked),
            });
            let running = builder.run().unwrap();

            let result = running.ip_output(protocol::UDP, b"x", LOCAL, peer);
            if failing {
                assert!(matches!(result, Err(NetError::ResolveFailed(addr)) if addr == peer));
            } else if pending {
                assert_eq!(result.unwrap(), IpOutput::Pending);
            } else {
                assert_eq!(result.unwrap(), IpOutput::Sent(1));
                assert_eq!(wire.frames()[0].dst, Some(hw));
            }
            assert_eq!(wire.frames().len(), expect_frame as usize);
            assert_eq!(asked.lock().unwrap().as_slice(), &[peer]);
            running.shutdown();
        }
    }

    #[test]
    fn test_default_gateway_is_next_hop() {
        let wire = Wire::default();
        let (mut builder, _, iface, _) = udp_setup(&wire, 1500, DeviceFlags::NEED_ARP);
        builder.route_set_default_gateway(&iface, "192.168.1.254").unwrap();
        assert!(matches!(
            builder.route_set_default_gateway(&iface, "192.168.1"),
            Err(NetError::Addr(_))
        ));
        let asked = Arc::new(Mutex::new(Vec::new()));
        builder.set_resolver(FixedResolver {
            answer: Answer::Resolve(HwAddr::new(&[0x02, 0, 0, 0, 0, 0xfe])),
            asked: Arc::clone(&asked),
        });
        let running = builder.run().unwrap();

        let remote = Ipv4Addr::new(8, 8, 8, 8);
        assert_eq!(running.ip_output(protocol::UDP, b"far", LOCAL, remote).unwrap(), IpOutput::Sent(3));
        assert_eq!(asked.lock().unwrap().as_slice(), &[Ipv4Addr::new(192, 168, 1, 254)]);
        let header = Ipv4Header::parse(&wire.frames()[0].data).unwrap();
        assert_eq!(header.dst_addr, remote);
        assert_eq!(running.ip_route_get_iface(remote).unwrap().unicast, LOCAL);
        running.shutdown();
    }

    #[test]
    fn test_iface_registration_rules() {
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        assert!(matches!(
            builder.ip_iface_register(3, IpIface::new(LOCAL, NETMASK)),
            Err(NetError::UnknownDevice(3))
        ));
        let dev = builder.device_register(crate::device::dummy::device()).unwrap();
        let iface = builder.ip_iface_register(dev, IpIface::new(LOCAL, NETMASK)).unwrap();
        assert_eq!(iface.dev(), dev);
        assert!(matches!(
            builder.ip_iface_register(dev, IpIface::new(Ipv4Addr::new(10, 0, 0, 1), NETMASK)),
            Err(NetError::DuplicateIface { .. })
        ));
        assert!(matches!(
            builder.protocol_register(ether_type::IP, |_: &Stack, _: &[u8], _: &Device| {}),
            Err(NetError::DuplicateProtocol(ether_type::IP))
        ));

        let running = builder.run().unwrap();
        assert_eq!(running.ip_iface_select(LOCAL).unwrap().dev(), dev);
        assert!(running.ip_iface_select(Ipv4Addr::new(10, 0, 0, 1)).is_none());
        assert_eq!(running.ip().routes().len(), 1);
        running.shutdown();
    }

    #[test]
    fn test_icmp_echo_over_loopback() {
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        let wire = Wire::looped();
        let dev = builder.device_register(wire_device(&wire, 1500, DeviceFlags::LOOPBACK)).unwrap();
        builder.ip_iface_register(dev, IpIface::new(LOCAL, NETMASK)).unwrap();
        icmp::register(&mut builder).unwrap();
        let running = builder.run().unwrap();

        let values = IcmpHeader::echo_values(42, 1);
        let sent = icmp::output(&running, ICMP_TYPE_ECHO_REQUEST, 0, values, b"ping", LOCAL, LOCAL).unwrap();
        assert_eq!(sent, IpOutput::Sent(12));

        assert!(wait_until(|| wire.frames().len() >= 2));
        let frames = wire.frames();
        let request = IcmpHeader::from_bytes(&frames[0].data[20..]).unwrap();
        let reply = IcmpHeader::from_bytes(&frames[1].data[20..]).unwrap();
        assert_eq!(request.msg_type, ICMP_TYPE_ECHO_REQUEST);
        assert_eq!(reply.msg_type, ICMP_TYPE_ECHO_REPLY);
        assert_eq!(reply.values, values);
        assert_eq!(&frames[1].data[28..], b"ping");
        running.shutdown();
    }

    #[test]
    fn test_timer_fires_in_softirq_context() {
        let (tx, rx) = mpsc::channel();
        let config = StackConfig::default().with_tick_interval(Duration::from_millis(5));
        let mut builder = StackBuilder::new(config).unwrap();
        builder
            .timer_register(Duration::from_millis(10), move |_: &Stack| {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            })
            .unwrap();
        let running = builder.run().unwrap();

        let name = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(name.as_deref(), Some("net-softirq"));
        assert!(rx.recv_timeout(TIMEOUT).is_ok());
        running.shutdown();
    }

    #[test]
    fn test_events_broadcast_to_every_subscriber() {
        let (tx, rx) = mpsc::channel();
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        for id in 0..2 {
            let tx = tx.clone();
            builder
                .event_subscribe(move |_: &Stack| {
                    let _ = tx.send(id);
                })
                .unwrap();
        }
        let running = builder.run().unwrap();

        running.raise_event();
        running.raise_event();
        let seen: Vec<i32> = (0..4).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 0, 1]);
        running.shutdown();
    }

    #[test]
    fn test_run_opens_and_shutdown_closes_devices() {
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        let dev = builder.device_register(crate::device::loopback::device()).unwrap();
        assert!(!builder.device(dev).unwrap().is_up());

        let running = builder.run().unwrap();
        let stack = Arc::clone(running.stack());
        assert!(stack.device(dev).unwrap().is_up());

        running.shutdown();
        assert!(!stack.device(dev).unwrap().is_up());
        assert!(matches!(
            stack.device(dev).unwrap().output(ether_type::IP, b"x", None),
            Err(NetError::NotOpened(_))
        ));
    }
}
