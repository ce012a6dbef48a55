//! The control panel's request vocabulary.
//!
//! Each request is a single line of whitespace-separated words, e.g. `motor 0.5 -1` or
//! `connect 0`. Each request gets exactly one [`Response`].

use thiserror::Error;

use std::fmt;
use std::str::FromStr;

use crate::bridge::Bridge;
use crate::queue::Command;
use crate::serial::{ConnectionState, DeviceList};
use crate::telemetry::BatteryStatus;

const MSG_NOT_CONNECTED: &str = "robot not connected";

/// A robot setting that maps directly to a command code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Setting {
    MotorOffset,
    SteeringOffset,
    AnimationMode,
}

impl FromStr for Setting {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motorOff" => Ok(Setting::MotorOffset),
            "steerOff" => Ok(Setting::SteeringOffset),
            "animeMode" => Ok(Setting::AnimationMode),
            _ => Err(RequestError::InvalidArgument {
                name: "setting",
                value: s.to_string(),
            }),
        }
    }
}

/// A request from the operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Joystick position, each axis in `[-1, 1]`.
    Motor { x: f32, y: f32 },
    Setting { setting: Setting, value: String },
    Animate(String),
    Servo { id: String, value: String },
    /// List the attachable devices.
    Ports,
    /// Toggle the link using the device at the given index.
    Connect(usize),
    Disconnect,
    Battery,
    Status,
}

/// A request could not be parsed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty request")]
    Empty,

    #[error("unknown request: {0}")]
    Unknown(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid {name}: {value}")]
    InvalidArgument { name: &'static str, value: String },

    #[error("too many arguments")]
    TooManyArguments,
}

/// Returns the next word of a request, or an error naming the missing argument.
fn arg<'a, I: Iterator<Item = &'a str>>(
    words: &mut I,
    name: &'static str,
) -> Result<&'a str, RequestError> {
    words.next().ok_or(RequestError::MissingArgument(name))
}

/// Parses a joystick axis, which must lie in `[-1, 1]`.
fn parse_axis(value: &str, name: &'static str) -> Result<f32, RequestError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| (-1.0..=1.0).contains(v))
        .ok_or_else(|| RequestError::InvalidArgument {
            name,
            value: value.to_string(),
        })
}

impl FromStr for Request {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let name = words.next().ok_or(RequestError::Empty)?;

        let request = match name {
            "motor" => Request::Motor {
                x: parse_axis(arg(&mut words, "x")?, "x")?,
                y: parse_axis(arg(&mut words, "y")?, "y")?,
            },
            "setting" => Request::Setting {
                setting: arg(&mut words, "setting")?.parse()?,
                value: arg(&mut words, "value")?.to_string(),
            },
            "animate" => Request::Animate(arg(&mut words, "animation")?.to_string()),
            "servo" => Request::Servo {
                id: arg(&mut words, "servo")?.to_string(),
                value: arg(&mut words, "value")?.to_string(),
            },
            "ports" => Request::Ports,
            "connect" => {
                let index = arg(&mut words, "port")?;
                Request::Connect(index.parse().map_err(|_| RequestError::InvalidArgument {
                    name: "port",
                    value: index.to_string(),
                })?)
            }
            "disconnect" => Request::Disconnect,
            "battery" => Request::Battery,
            "status" => Request::Status,
            _ => return Err(RequestError::Unknown(name.to_string())),
        };

        if words.next().is_some() {
            return Err(RequestError::TooManyArguments);
        }

        Ok(request)
    }
}

impl Request {
    /// Returns the commands this request sends to the robot, or `None` if it does not drive the
    /// robot.
    pub fn commands(&self) -> Option<Vec<Command>> {
        match self {
            Request::Motor { x, y } => Some(vec![
                // The X axis is mirrored on the robot
                Command::motor_x((-x * 100.0) as i32),
                Command::motor_y((y * 100.0) as i32),
            ]),
            Request::Setting { setting, value } => Some(vec![match setting {
                Setting::MotorOffset => Command::motor_offset(value),
                Setting::SteeringOffset => Command::steering_offset(value),
                Setting::AnimationMode => Command::animation_mode(value),
            }]),
            Request::Animate(id) => Some(vec![Command::animation(id)]),
            Request::Servo { id, value } => Command::servo(id, value).map(|c| vec![c]),
            _ => None,
        }
    }
}

/// The reply to a [`Request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ok,
    Ports(DeviceList),
    Link(ConnectionState),
    Battery { level: i32, status: BatteryStatus },
    Error(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => f.write_str("OK"),
            Response::Ports(list) => {
                write!(f, "OK ports {}", list.preferred)?;
                for c in &list.candidates {
                    write!(f, "\t{}", c.description)?;
                }
                Ok(())
            }
            Response::Link(state) => write!(f, "OK link {}", state),
            Response::Battery { level, status } => write!(f, "OK battery {} {}", level, status),
            Response::Error(msg) => write!(f, "ERROR {}", msg),
        }
    }
}

/// Carries out `request` against `bridge`. May block while the link connects or disconnects.
pub fn handle(bridge: &Bridge, request: &Request) -> Response {
    if let Some(commands) = request.commands() {
        if !bridge.is_live() {
            return Response::Error(MSG_NOT_CONNECTED.to_string());
        }

        bridge.enqueue_all(commands);
        return Response::Ok;
    }

    match *request {
        Request::Ports => match bridge.list_candidates() {
            Ok(list) => Response::Ports(list),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Connect(index) => {
            if bridge.is_live() {
                bridge.disconnect();
                Response::Link(ConnectionState::Disconnected)
            } else {
                match bridge.connect(index) {
                    Ok(state) => Response::Link(state),
                    Err(e) => Response::Error(e.to_string()),
                }
            }
        }
        Request::Disconnect => {
            bridge.disconnect();
            Response::Link(ConnectionState::Disconnected)
        }
        Request::Battery => {
            if bridge.is_live() {
                let level = bridge.telemetry().battery();
                Response::Battery {
                    level,
                    status: BatteryStatus::from_level(level),
                }
            } else {
                Response::Error(MSG_NOT_CONNECTED.to_string())
            }
        }
        Request::Status => {
            if bridge.is_live() {
                Response::Link(ConnectionState::Connected)
            } else {
                Response::Link(ConnectionState::Disconnected)
            }
        }
        // Requests with commands were handled above; a servo request with no command text lands
        // here
        _ => Response::Error("invalid command".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use crate::serial::DeviceCandidate;

    use super::*;

    fn parse(s: &str) -> Result<Request, RequestError> {
        s.parse()
    }

    #[test]
    fn test_parse_requests() {
        assert_eq!(Ok(Request::Motor { x: 0.5, y: -1.0 }), parse("motor 0.5 -1"));
        assert_eq!(Ok(Request::Motor { x: -1.0, y: 1.0 }), parse("motor -1 1.0"));
        assert_eq!(
            Ok(Request::Setting { setting: Setting::SteeringOffset, value: "-3".to_string() }),
            parse("setting steerOff -3"),
        );
        assert_eq!(Ok(Request::Animate("4".to_string())), parse("animate 4"));
        assert_eq!(
            Ok(Request::Servo { id: "G".to_string(), value: "80".to_string() }),
            parse("  servo G 80 "),
        );
        assert_eq!(Ok(Request::Ports), parse("ports"));
        assert_eq!(Ok(Request::Connect(2)), parse("connect 2"));
        assert_eq!(Ok(Request::Disconnect), parse("disconnect"));
        assert_eq!(Ok(Request::Battery), parse("battery"));
        assert_eq!(Ok(Request::Status), parse("status\n"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Err(RequestError::Empty), parse("   "));
        assert_eq!(Err(RequestError::Unknown("fly".to_string())), parse("fly"));
        assert_eq!(Err(RequestError::MissingArgument("y")), parse("motor 0.5"));
        assert_eq!(
            Err(RequestError::InvalidArgument { name: "x", value: "NaN".to_string() }),
            parse("motor NaN 0"),
        );
        assert_eq!(
            Err(RequestError::InvalidArgument { name: "y", value: "1.5".to_string() }),
            parse("motor 0 1.5"),
        );
        assert_eq!(
            Err(RequestError::InvalidArgument { name: "x", value: "-2".to_string() }),
            parse("motor -2 0"),
        );
        assert_eq!(
            Err(RequestError::InvalidArgument { name: "x", value: "inf".to_string() }),
            parse("motor inf 0"),
        );
        assert_eq!(
            Err(RequestError::InvalidArgument { name: "port", value: "-1".to_string() }),
            parse("connect -1"),
        );
        assert_eq!(
            Err(RequestError::InvalidArgument { name: "setting", value: "volume".to_string() }),
            parse("setting volume 5"),
        );
        assert_eq!(Err(RequestError::TooManyArguments), parse("battery now"));
    }

    #[test]
    fn test_commands() {
        let commands = |s: &str| {
            parse(s)
                .unwrap()
                .commands()
                .map(|c| c.iter().map(Command::to_string).collect::<Vec<_>>())
        };

        assert_eq!(Some(vec!["X-50".to_string(), "Y100".to_string()]), commands("motor 0.5 1"));
        // Values are truncated toward zero
        assert_eq!(Some(vec!["X33".to_string(), "Y-33".to_string()]), commands("motor -0.339 -0.339"));
        assert_eq!(Some(vec!["O4".to_string()]), commands("setting motorOff 4"));
        assert_eq!(Some(vec!["S-2".to_string()]), commands("setting steerOff -2"));
        assert_eq!(Some(vec!["M1".to_string()]), commands("setting animeMode 1"));
        assert_eq!(Some(vec!["A7".to_string()]), commands("animate 7"));
        assert_eq!(Some(vec!["L120".to_string()]), commands("servo L 120"));
        assert_eq!(None, commands("ports"));
        assert_eq!(None, commands("connect 0"));
    }

    #[test]
    fn test_response_display() {
        assert_eq!("OK", Response::Ok.to_string());
        assert_eq!("OK link connected", Response::Link(ConnectionState::Connected).to_string());
        assert_eq!(
            "OK battery 87 87%",
            Response::Battery { level: 87, status: BatteryStatus::Level(87) }.to_string(),
        );
        assert_eq!(
            "ERROR robot not connected",
            Response::Error(MSG_NOT_CONNECTED.to_string()).to_string(),
        );

        let list = DeviceList {
            candidates: vec![
                DeviceCandidate { path: "/dev/ttyS0".to_string(), description: "ttyS0".to_string() },
                DeviceCandidate { path: "/dev/ttyACM0".to_string(), description: "Arduino Uno".to_string() },
            ],
            preferred: 1,
        };
        assert_eq!("OK ports 1\tttyS0\tArduino Uno", Response::Ports(list).to_string());
    }
}
