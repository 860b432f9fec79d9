//! Probe, announce and then defend an IPv4 address on one interface.
//!
//! Usage: arp_probe <interface> <ip> [--kernel]

#[cfg(target_os = "linux")]
mod demo {
    use std::env;
    use std::net::Ipv4Addr;
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::str::FromStr;

    use dhcp_arp::{
        lookup_interface, AcdConfig, AcdEvent, Arp, CaptureHandle, Hooks, PacketSocket,
        TimerQueue,
    };
    use log::{info, warn};
    use tokio::io::unix::AsyncFd;
    use tokio::time::{sleep_until, Instant};

    type Engine = Arp<PacketSocket, TimerQueue>;

    /// Borrowed view of the capture descriptor. The engine owns and closes it.
    struct Watched(RawFd);

    impl AsRawFd for Watched {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }

    async fn next_timer(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    fn current_reader(arp: &Engine) -> Option<(u64, CaptureHandle)> {
        let eloop = arp.event_loop();
        eloop
            .readers()
            .next()
            .map(|(handle, _)| (eloop.registrations(), handle))
    }

    pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
        let args: Vec<String> = env::args().collect();
        if args.len() < 3 {
            eprintln!("Usage: {} <interface> <ip> [--kernel]", args[0]);
            eprintln!("Example: {} eth0 192.168.1.50", args[0]);
            std::process::exit(1);
        }
        let ifname = args[1].as_str();
        let addr = Ipv4Addr::from_str(&args[2])?;
        let config = if args.iter().skip(3).any(|a| a == "--kernel") {
            AcdConfig::kernel_assisted()
        } else {
            AcdConfig::default()
        };

        let ifp = lookup_interface(ifname).await?;
        info!("{}: index {} hwaddr {:02x?}", ifname, ifp.index(), ifp.hwaddr());

        let mut arp = Arp::new(config, PacketSocket::new(), TimerQueue::new());
        arp.add_interface(ifp);
        let id = arp.new_state(ifname, addr)?;
        if let Some(state) = arp.state_mut(id) {
            state.set_hooks(Hooks::all());
        }
        info!("{}: probing {}", ifname, addr);
        arp.probe(id)?;

        // Keyed by registration count: a reopened socket may reuse the fd.
        let mut watch: Option<(u64, AsyncFd<Watched>)> = None;
        loop {
            let reader = current_reader(&arp);
            let watched = watch.as_ref().map(|(generation, _)| *generation);
            if watched != reader.map(|(generation, _)| generation) {
                watch = None;
                if let Some((generation, handle)) = reader {
                    watch = Some((generation, AsyncFd::new(Watched(handle.0))?));
                }
            }

            let deadline = arp.event_loop().next_deadline();
            tokio::select! {
                _ = next_timer(deadline) => {
                    while let Some(timer) = arp.event_loop_mut().pop_expired(Instant::now()) {
                        arp.handle_timer(timer);
                    }
                }
                guard = async {
                    match &watch {
                        Some((_, fd)) => fd.readable().await,
                        None => std::future::pending().await,
                    }
                } => {
                    let mut guard = guard?;
                    arp.handle_readable(ifname);
                    guard.clear_ready();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("{}: interrupted", ifname);
                    break;
                }
            }

            while let Some(event) = arp.poll_event() {
                match event {
                    AcdEvent::Probed(id) => {
                        info!("{}: {} is free, announcing", ifname, addr);
                        arp.announce(id)?;
                    }
                    AcdEvent::Announced(_) => {
                        info!("{}: claimed {}, defending until interrupted", ifname, addr);
                    }
                    AcdEvent::Conflict { id, message } => {
                        arp.report_conflicted(id, message.as_ref());
                        arp.free(id);
                    }
                    AcdEvent::Destroyed { addr, .. } => {
                        warn!("{}: gave up on {}", ifname, addr);
                        arp.drop_interface(ifname);
                        return Ok(());
                    }
                }
            }
        }

        arp.drop_interface(ifname);
        Ok(())
    }
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    demo::run().await
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("arp_probe needs AF_PACKET sockets and only runs on Linux");
}
