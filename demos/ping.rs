mod utils;

use std::cmp;
use std::collections::HashMap;
use std::os::fd::AsRawFd;

use byteorder::{ByteOrder, NetworkEndian};

use tapip_rs::{
    iface::{Config, Interface, SocketSet},
    phy::Device,
    socket::icmp,
    time::{Duration, Instant},
    wire::{EthernetAddress, Icmpv4Packet, Icmpv4Repr, IpAddress, IpCidr, Ipv4Address},
};

fn main() {
    utils::setup_logging("warn");

    let (mut opts, mut free) = utils::create_options();
    // cargo run --example ping -- --tap tap0 192.168.69.100
    utils::add_tuntap_options(&mut opts, &mut free);
    opts.optopt("c", "count", "number of pings to send (default 4)", "N");
    let matches = {
        let args: Vec<String> = std::env::args().collect();
        opts.parse(&args[1..]).unwrap_or_else(|err| {
            eprintln!("{err}");
            std::process::exit(2);
        })
    };
    let mut matches = matches;
    let remote_addr: Ipv4Address = matches
        .free
        .first()
        .expect("usage: ping [options] ADDRESS")
        .parse()
        .expect("invalid IPv4 address");
    let count: u16 = matches
        .opt_str("count")
        .map(|s| s.parse().expect("invalid --count"))
        .unwrap_or(4);

    let mut device = utils::parse_tuntap_options(&mut matches);
    let fd = device.as_raw_fd();
    let device_caps = device.capabilities();

    let mut config = Config::new(EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]).into());
    config.random_seed = rand::random();
    let mut iface = Interface::new(config, &mut device, Instant::now());
    iface.update_ip_addrs(|ip_addrs| {
        ip_addrs
            .push(IpCidr::new(IpAddress::v4(192, 168, 69, 1), 24))
            .unwrap();
    });
    iface
        .routes_mut()
        .add_default_ipv4_route(Ipv4Address::new(192, 168, 69, 100))
        .unwrap();

    let icmp_rx_buffer = icmp::PacketBuffer::new(8, 1024);
    let icmp_tx_buffer = icmp::PacketBuffer::new(8, 1024);
    let icmp_socket = icmp::Socket::new(icmp_rx_buffer, icmp_tx_buffer);
    let mut sockets = SocketSet::new(Vec::new());
    let icmp_handle = sockets.add(icmp_socket);

    let ident = 0x22b;
    let interval = Duration::from_secs(1);
    let timeout = Duration::from_secs(5);
    let mut send_at = Instant::from_millis(0);
    let mut seq_no = 0u16;
    let mut received = 0u16;
    let mut echo_payload = [0xffu8; 40];
    let mut waiting_queue: HashMap<u16, Instant> = HashMap::new();

    loop {
        let timestamp = Instant::now();
        iface.poll(timestamp, &mut device, &mut sockets);

        let timestamp = Instant::now();
        let socket = sockets.get_mut::<icmp::Socket>(icmp_handle);
        if !socket.is_open() {
            socket.bind(icmp::Endpoint::Ident(ident)).unwrap();
            send_at = timestamp;
        }

        if socket.can_send() && seq_no < count && send_at <= timestamp {
            NetworkEndian::write_i64(&mut echo_payload[0..8], timestamp.total_millis() as i64);

            let icmp_repr = Icmpv4Repr::EchoRequest {
                ident,
                seq_no,
                data: &echo_payload,
            };
            let mut icmp_payload = vec![0u8; icmp_repr.buffer_len()];
            let mut icmp_packet = Icmpv4Packet::new_unchecked(&mut icmp_payload[..]);
            icmp_repr.emit(&mut icmp_packet, &device_caps.checksum);
            socket
                .send_slice(&icmp_payload, IpAddress::Ipv4(remote_addr))
                .unwrap();

            waiting_queue.insert(seq_no, timestamp);
            seq_no += 1;
            send_at += interval;
        }

        if socket.can_recv() {
            let mut payload = [0u8; 128];
            let (len, _from) = socket.recv_slice(&mut payload).unwrap();
            let payload = &payload[..len];
            let icmp_packet = Icmpv4Packet::new_checked(payload).unwrap();
            let icmp_repr = Icmpv4Repr::parse(&icmp_packet, &device_caps.checksum).unwrap();
            if let Icmpv4Repr::EchoReply { seq_no, data, .. } = icmp_repr {
                if let Some(from) = waiting_queue.remove(&seq_no) {
                    let rtt = timestamp.checked_duration_since(from);
                    println!(
                        "{} bytes from {}: icmp_seq={} time={}ms",
                        data.len(),
                        remote_addr,
                        seq_no,
                        rtt.total_millis()
                    );
                    received += 1;
                }
            }
        }

        waiting_queue.retain(|seq, from| {
            if timestamp.checked_duration_since(*from) < timeout {
                true
            } else {
                println!("From {remote_addr} icmp_seq={seq} timeout");
                false
            }
        });

        if seq_no == count && waiting_queue.is_empty() {
            break;
        }

        let timestamp = Instant::now();
        match iface.poll_at(timestamp, &sockets) {
            Some(poll_at) if timestamp < poll_at => {
                let resume_at = cmp::min(poll_at, send_at);
                utils::phy_wait(fd, Some(resume_at.checked_duration_since(timestamp)))
                    .expect("wait error");
            }
            Some(_) => (),
            None => {
                utils::phy_wait(fd, Some(send_at.checked_duration_since(timestamp)))
                    .expect("wait error");
            }
        }
    }

    println!("{received}/{count} packets received");
}
