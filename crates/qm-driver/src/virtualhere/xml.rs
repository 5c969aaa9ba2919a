use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::HostError;

/// One `<device .../>` element from a VirtualHere `GET CLIENT STATE` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub address: String,
    pub nickname: String,
    pub state: String,
}

/// Parsed `GET CLIENT STATE` response: the hostname of the `127.0.0.1`
/// connection (if any) plus every device VirtualHere currently sees.
/// Grounded on `USB_Quartermaster_VirtualHere.driver.VirtualHereOverSSHHost._get_state_data`/`get_states`.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub localhost_hostname: Option<String>,
    pub devices: Vec<RawDevice>,
}

fn attr(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

pub fn parse_client_state(xml: &str) -> Result<ClientState, HostError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = ClientState::default();
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"connection" => {
                    if attr(&e, "ip").as_deref() == Some("127.0.0.1") {
                        state.localhost_hostname = attr(&e, "hostname");
                    }
                }
                b"device" => {
                    let address = attr(&e, "address").unwrap_or_default();
                    let nickname = attr(&e, "nickname").unwrap_or_default();
                    let device_state = attr(&e, "state").unwrap_or_default();
                    state.devices.push(RawDevice { address, nickname, state: device_state });
                }
                _ => {}
            },
            Err(e) => return Err(HostError::VirtualHereStateParse(e.to_string())),
            _ => {}
        }
    }
    Ok(state)
}
