//! Service registration, per-client transports and the event dispatcher.
//!
//! Framed XIM payloads travel in `_XIM_PROTOCOL` client messages: up to
//! [`TRANSPORT_MAX`] bytes embedded at format 8, anything larger staged in a
//! `STRING` property named by a format-32 message. `CONNECT` and
//! `DISCONNECT` are answered inline; every other frame is queued for the
//! session layer to drain through [`XimServer::poll_request`].

use std::collections::VecDeque;

use ximd_wire::{frames, opcode, ByteOrder};

use crate::error::Error;
use crate::provider::{
    ClientMessage, ClientMessageData, PropMode, Window, XEvent, XProvider, ATOM_ATOM, ATOM_STRING,
    WINDOW_NONE,
};
use crate::Atoms;

/// Largest payload embedded directly in a client message, advertised to
/// clients in the `_XIM_XCONNECT` reply.
pub const TRANSPORT_MAX: usize = 20;

/// One peer connection. The byte order is fixed by the first byte of the
/// client's `CONNECT` payload and stays big-endian until then.
#[derive(Clone, Copy, Debug)]
pub struct Transport {
    client_window: Window,
    server_window: Window,
    order: ByteOrder,
}

impl Transport {
    pub fn client_window(&self) -> Window {
        self.client_window
    }

    pub fn server_window(&self) -> Window {
        self.server_window
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }
}

/// A queued request: the raw frame plus the server window of the transport
/// it arrived on.
#[derive(Clone, Debug)]
pub struct RequestContainer {
    pub transport: Window,
    pub bytes: Vec<u8>,
}

impl RequestContainer {
    pub fn major_opcode(&self) -> u8 {
        self.bytes[0]
    }
}

/// Outcome of dispatching one window-system event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// The event is unrelated to the input method service.
    Continue,
    /// The event was consumed.
    Remove,
}

pub struct XimServer<X: XProvider> {
    x: X,
    locale: String,
    atoms: Atoms<u32>,
    server_atom: u32,
    accept_window: Window,
    transports: Vec<Transport>,
    requests: VecDeque<RequestContainer>,
    closed: Vec<Window>,
    data_serial: u16,
}

impl<X: XProvider> XimServer<X> {
    /// Registers the server: interns the well-known atoms plus
    /// `@server=<name>`, creates the accept window, claims the per-server
    /// selection and publishes it through `XIM_SERVERS` on the root.
    ///
    /// Fails when the selection is already owned by some other window.
    pub fn new(x: X, name: &str, locale: &str) -> Result<Self, Error> {
        let atoms = Atoms::new(|atom| x.intern_atom(atom)).map_err(Error::x_provider)?;
        let server_atom = x
            .intern_atom(&format!("@server={}", name))
            .map_err(Error::x_provider)?;
        let accept_window = x.create_window().map_err(Error::x_provider)?;

        let servers = x
            .get_property(x.root(), atoms.XIM_SERVERS, ATOM_ATOM, false)
            .map_err(Error::x_provider)?;

        let mut registered = false;
        if let Some(servers) = &servers {
            if servers.ty != ATOM_ATOM || servers.format != 32 {
                return Err(Error::InvalidReply);
            }
            registered = servers.value32().any(|atom| atom == server_atom);
        }

        if registered {
            let owner = x.selection_owner(server_atom).map_err(Error::x_provider)?;
            if owner != WINDOW_NONE && owner != accept_window {
                return Err(Error::SelectionOwned(format!("@server={}", name)));
            }
        }

        x.set_selection_owner(accept_window, server_atom)
            .map_err(Error::x_provider)?;

        if !registered {
            x.change_property32(
                PropMode::Prepend,
                x.root(),
                atoms.XIM_SERVERS,
                ATOM_ATOM,
                &[server_atom],
            )
            .map_err(Error::x_provider)?;
        }

        x.flush().map_err(Error::x_provider)?;

        log::info!("serving @server={} on window {}", name, accept_window);

        Ok(Self {
            x,
            locale: locale.to_owned(),
            atoms,
            server_atom,
            accept_window,
            transports: Vec::new(),
            requests: VecDeque::new(),
            closed: Vec::new(),
            data_serial: 0,
        })
    }

    pub fn x(&self) -> &X {
        &self.x
    }

    pub fn accept_window(&self) -> Window {
        self.accept_window
    }

    pub fn transport(&self, server_window: Window) -> Option<&Transport> {
        self.transports
            .iter()
            .find(|t| t.server_window == server_window)
    }

    /// Byte order of the given transport; fails when the transport is gone.
    pub fn order_of(&self, server_window: Window) -> Result<ByteOrder, Error> {
        self.transport(server_window)
            .map(Transport::order)
            .ok_or(Error::UnknownTransport(server_window))
    }

    /// Pops the next queued session request.
    pub fn poll_request(&mut self) -> Option<RequestContainer> {
        self.requests.pop_front()
    }

    /// Transports torn down since the last call, for the session layer to
    /// cascade into its input methods.
    pub fn take_closed_transports(&mut self) -> Vec<Window> {
        std::mem::take(&mut self.closed)
    }

    /// Routes one window-system event. Framework requests are answered
    /// inline, session requests are queued, anything unrelated is left
    /// alone.
    pub fn dispatch(&mut self, event: &XEvent) -> Result<Dispatch, Error> {
        match event {
            XEvent::SelectionRequest(request) if request.owner == self.accept_window => {
                let data = if request.target == self.atoms.LOCALES {
                    format!("@locale={}", self.locale)
                } else if request.target == self.atoms.TRANSPORT {
                    "@transport=X/".to_owned()
                } else {
                    return Ok(Dispatch::Continue);
                };

                log::trace!("selection notify {:?}", data);
                self.x
                    .change_property8(
                        PropMode::Replace,
                        request.requestor,
                        request.property,
                        request.target,
                        data.as_bytes(),
                    )
                    .map_err(Error::x_provider)?;
                self.x
                    .send_selection_notify(request)
                    .map_err(Error::x_provider)?;
                self.x.flush().map_err(Error::x_provider)?;
                Ok(Dispatch::Remove)
            }
            XEvent::SelectionRequest(_) => Ok(Dispatch::Continue),
            XEvent::ClientMessage(msg) if msg.message_type == self.atoms.XIM_XCONNECT => {
                self.accept_connection(msg)?;
                Ok(Dispatch::Remove)
            }
            XEvent::ClientMessage(msg) if msg.message_type == self.atoms.XIM_PROTOCOL => {
                self.handle_protocol_message(msg)?;
                Ok(Dispatch::Remove)
            }
            XEvent::ClientMessage(_) => Ok(Dispatch::Continue),
        }
    }

    fn accept_connection(&mut self, msg: &ClientMessage) -> Result<(), Error> {
        let ClientMessageData::Data32(data) = msg.data else {
            return Err(Error::MalformedClientMessage("_XIM_XCONNECT"));
        };

        let client_window = data[0];
        let server_window = self.x.create_window().map_err(Error::x_provider)?;
        self.transports.push(Transport {
            client_window,
            server_window,
            order: ByteOrder::Big,
        });

        log::info!(
            "accepted client window {} on transport window {}",
            client_window,
            server_window
        );

        self.x
            .send_client_message(
                client_window,
                self.atoms.XIM_XCONNECT,
                ClientMessageData::Data32([server_window, 0, 0, TRANSPORT_MAX as u32, 0]),
            )
            .map_err(Error::x_provider)?;
        self.x.flush().map_err(Error::x_provider)?;
        Ok(())
    }

    fn handle_protocol_message(&mut self, msg: &ClientMessage) -> Result<(), Error> {
        let index = self
            .transports
            .iter()
            .position(|t| t.server_window == msg.window)
            .ok_or(Error::UnknownTransport(msg.window))?;

        let bytes = self.read_payload(index, msg)?;
        log::trace!("> {:02x?}", bytes);

        let transport = self.transports[index];
        match bytes[0] {
            opcode::CONNECT => {
                let connect = frames::ConnectRequest::parse(&bytes)?;
                self.transports[index].order = connect.order;
                log::debug!(
                    "client {} connected, protocol {}.{}",
                    transport.client_window,
                    connect.client_major_protocol_version,
                    connect.client_minor_protocol_version
                );
                self.send(msg.window, &frames::connect_reply(connect.order, 1, 0))
            }
            opcode::DISCONNECT => {
                self.send(msg.window, &frames::disconnect_reply(transport.order))?;
                self.transports.swap_remove(index);
                self.closed.push(msg.window);
                log::debug!("client {} disconnected", transport.client_window);
                Ok(())
            }
            _ => {
                self.requests.push_back(RequestContainer {
                    transport: msg.window,
                    bytes,
                });
                Ok(())
            }
        }
    }

    /// Extracts the framed payload, validating the frame's self-declared
    /// length against what actually arrived.
    fn read_payload(&mut self, index: usize, msg: &ClientMessage) -> Result<Vec<u8>, Error> {
        match msg.data {
            ClientMessageData::Data8(data) => {
                // The CONNECT frame fixes the byte order; its length field
                // can only be validated with the announced order.
                let order = if data[0] == opcode::CONNECT {
                    ByteOrder::from_marker(data[4])?
                } else {
                    self.transports[index].order
                };

                let declared = order.u16_at(&data, 2) as usize * 4 + 4;
                if declared > data.len() {
                    return Err(Error::BadPayloadLength {
                        declared,
                        actual: data.len(),
                    });
                }
                Ok(data[..declared].to_vec())
            }
            ClientMessageData::Data32(words) => {
                let declared = words[0] as usize;
                let property = words[1];

                let value = self
                    .x
                    .get_property(msg.window, property, ATOM_STRING, true)
                    .map_err(Error::x_provider)?
                    .ok_or(Error::InvalidReply)?
                    .value;

                if declared > value.len() || declared < 4 {
                    return Err(Error::BadPayloadLength {
                        declared,
                        actual: value.len(),
                    });
                }

                let order = self.transports[index].order;
                let frame_len = order.u16_at(&value, 2) as usize * 4 + 4;
                if frame_len > declared {
                    return Err(Error::BadPayloadLength {
                        declared,
                        actual: frame_len,
                    });
                }

                let mut value = value;
                value.truncate(frame_len);
                Ok(value)
            }
        }
    }

    /// Writes one framed message to a transport, embedding small payloads
    /// and staging larger ones through a `server<N>` property.
    pub fn send(&mut self, server_window: Window, bytes: &[u8]) -> Result<(), Error> {
        let transport = self
            .transport(server_window)
            .copied()
            .ok_or(Error::UnknownTransport(server_window))?;

        log::trace!("< {:02x?}", bytes);

        if bytes.len() <= TRANSPORT_MAX {
            let mut data = [0u8; TRANSPORT_MAX];
            data[..bytes.len()].copy_from_slice(bytes);
            self.x
                .send_client_message(
                    transport.client_window,
                    self.atoms.XIM_PROTOCOL,
                    ClientMessageData::Data8(data),
                )
                .map_err(Error::x_provider)?;
        } else {
            let name = format!("server{}", self.data_serial);
            self.data_serial = self.data_serial.wrapping_add(1);
            let property = self.x.intern_atom(&name).map_err(Error::x_provider)?;

            // Drop any stale value before appending.
            self.x
                .get_property(transport.client_window, property, ATOM_STRING, true)
                .map_err(Error::x_provider)?;
            self.x
                .change_property8(
                    PropMode::Append,
                    transport.client_window,
                    property,
                    ATOM_STRING,
                    bytes,
                )
                .map_err(Error::x_provider)?;
            self.x
                .send_client_message(
                    transport.client_window,
                    self.atoms.XIM_PROTOCOL,
                    ClientMessageData::Data32([bytes.len() as u32, property, 0, 0, 0]),
                )
                .map_err(Error::x_provider)?;
        }

        self.x.flush().map_err(Error::x_provider)?;
        Ok(())
    }
}

impl<X: XProvider> Drop for XimServer<X> {
    fn drop(&mut self) {
        for transport in &self.transports {
            let _ = self.x.destroy_window(transport.server_window);
        }
        let _ = self.x.destroy_window(self.accept_window);
        let _ = self.x.flush();
    }
}
