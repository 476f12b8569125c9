use std::os::fd::{AsRawFd, BorrowedFd};
use std::rc::Rc;

use clap::Parser;
use rustix::event::{poll, PollFd, PollFlags};
use x11rb::connection::Connection as _;
use x11rb::rust_connection::RustConnection;

use ximd::wayland::WaylandTextInput;
use ximd::x11rb::{convert_event, X11rbProvider};
use ximd::{Engine, TextInputProvider as _, XimServer};

/// XIM server driving the compositor text input service.
#[derive(Parser)]
#[command(name = "ximd", version)]
struct Args {
    /// Locale string published through the LOCALES selection
    #[arg(short, long, default_value = "C,en")]
    locale: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let args = Args::parse();

    run(&args).map_err(|err| {
        log::error!("{}", err);
        err
    })
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let text = WaylandTextInput::connect()?;
    let (conn, screen_num) = RustConnection::connect(None)?;
    let conn = Rc::new(conn);
    let provider = X11rbProvider::new(Rc::clone(&conn), screen_num);
    let server = XimServer::new(provider, "wayland", &args.locale)?;
    let mut engine = Engine::new(server, text);

    loop {
        // Everything already buffered on the compositor side first.
        engine.text_mut().dispatch_pending()?;
        while let Some(event) = engine.text_mut().poll_event() {
            engine.handle_text_input_event(event)?;
        }
        engine.text_mut().flush()?;

        let Some(read_guard) = engine.text_mut().prepare_read() else {
            continue;
        };

        let (wayland_revents, x_revents) = {
            let wayland_fd = read_guard.connection_fd();
            let x_fd = unsafe { BorrowedFd::borrow_raw(conn.stream().as_raw_fd()) };
            let mut fds = [
                PollFd::new(&wayland_fd, PollFlags::IN),
                PollFd::new(&x_fd, PollFlags::IN),
            ];
            poll(&mut fds, -1)?;
            (fds[0].revents(), fds[1].revents())
        };

        if wayland_revents.intersects(PollFlags::ERR | PollFlags::HUP) {
            return Err("lost connection to the wayland display".into());
        }
        if x_revents.intersects(PollFlags::ERR | PollFlags::HUP) {
            return Err("lost connection to the X display".into());
        }

        if wayland_revents.contains(PollFlags::IN) {
            read_guard.read()?;
        } else {
            drop(read_guard);
        }

        if x_revents.contains(PollFlags::IN) {
            while let Some(event) = conn.poll_for_event()? {
                if let Some(event) = convert_event(&event) {
                    engine.dispatch(&event)?;
                }
                engine.drain_requests()?;
            }
        }
    }
}
