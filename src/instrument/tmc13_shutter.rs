//! TMC13 used as a shutter switch.
//!
//! The shutter state is swept through [`Device::apply`]; `configure` and
//! `unconfigure` move the shutter to the configured start and end states.

use super::tmc13::{channel_choices, parse_channel, DEFAULT_HOST_ID};
use super::tmc_link::{command, TmcLink};
use crate::adapters::Adapter;
use crate::core::{Device, GuiField, GuiParameters, InstrumentState, ParameterValue};
use crate::error::{AppResult, DaqError};
use crate::measurement::{Sample, Variable};
use crate::protocol::v2;
use log::info;
use std::fmt;
use std::str::FromStr;

/// Position of the shutter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterState {
    /// Code 0.
    Closed,
    /// Code 1.
    Open,
}

impl ShutterState {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            ShutterState::Closed => 0,
            ShutterState::Open => 1,
        }
    }

    /// State for a raw or ASCII wire code.
    pub fn from_code(code: u8) -> AppResult<Self> {
        match code {
            0 | b'0' => Ok(ShutterState::Closed),
            1 | b'1' => Ok(ShutterState::Open),
            other => Err(DaqError::framing(
                v2::PROTOCOL_NAME,
                format!("unknown shutter state {:#04X}", other),
            )),
        }
    }
}

impl fmt::Display for ShutterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutterState::Closed => write!(f, "Closed"),
            ShutterState::Open => write!(f, "Open"),
        }
    }
}

impl FromStr for ShutterState {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "1" | "true" => Ok(ShutterState::Open),
            "closed" | "0" | "false" => Ok(ShutterState::Closed),
            _ => Err(DaqError::Configuration(format!(
                "Invalid shutter state '{}'. Use 'open', 'closed', 0 or 1",
                s
            ))),
        }
    }
}

impl TryFrom<&ParameterValue> for ShutterState {
    type Error = DaqError;

    fn try_from(value: &ParameterValue) -> Result<Self, Self::Error> {
        match value {
            ParameterValue::Bool(true) => Ok(ShutterState::Open),
            ParameterValue::Bool(false) => Ok(ShutterState::Closed),
            ParameterValue::Int(1) => Ok(ShutterState::Open),
            ParameterValue::Int(0) => Ok(ShutterState::Closed),
            ParameterValue::Float(f) if *f == 1.0 => Ok(ShutterState::Open),
            ParameterValue::Float(f) if *f == 0.0 => Ok(ShutterState::Closed),
            ParameterValue::String(s) => s.parse(),
            other => Err(DaqError::Configuration(format!(
                "Invalid shutter state {}. Use 'open', 'closed', 0 or 1",
                other
            ))),
        }
    }
}

/// Target for the start or end of a sequence; `None` leaves the shutter as is.
fn parse_target(parameters: &GuiParameters, name: &str) -> AppResult<Option<ShutterState>> {
    let value = parameters.string(name)?;
    if value == "As is" {
        Ok(None)
    } else {
        value.parse().map(Some)
    }
}

/// TMC13 shutter switch.
pub struct Tmc13Shutter<A: Adapter> {
    id: String,
    link: TmcLink<A>,
    host_id: String,
    state: InstrumentState,
    sweep_state: bool,
    start_state: Option<ShutterState>,
    end_state: Option<ShutterState>,
}

impl<A: Adapter> Tmc13Shutter<A> {
    /// Driver on channel 1 with the default host ID.
    pub fn new(adapter: A) -> Self {
        Self {
            id: "TMC13 Shutter".to_string(),
            link: TmcLink::new(adapter),
            host_id: DEFAULT_HOST_ID.to_string(),
            state: InstrumentState::Disconnected,
            sweep_state: true,
            start_state: None,
            end_state: None,
        }
    }

    /// Register with `host_id` instead of the default.
    pub fn with_host_id(mut self, host_id: &str) -> Self {
        self.host_id = host_id.to_string();
        self
    }

    /// Shared V2.x session.
    pub fn link(&self) -> &TmcLink<A> {
        &self.link
    }

    /// Shared V2.x session.
    pub fn link_mut(&mut self) -> &mut TmcLink<A> {
        &mut self.link
    }

    /// Current shutter state of the selected channel.
    pub fn get_shutter_state(&mut self) -> AppResult<ShutterState> {
        let channel = self.link.channel();
        let payload = self.link.transact(command::SHUTTER, &[channel])?;
        let code = *payload.last().ok_or_else(|| {
            DaqError::framing(v2::PROTOCOL_NAME, "shutter answer is empty")
        })?;
        ShutterState::from_code(code)
    }

    /// Move the shutter of the selected channel.
    pub fn set_shutter_state(&mut self, target: ShutterState) -> AppResult<()> {
        let channel = self.link.channel();
        self.link.transact(command::SHUTTER.write(), &[channel, target.code()])?;
        info!("Shutter on channel {} set to {}", channel, target);
        Ok(())
    }
}

impl<A: Adapter> Device for Tmc13Shutter<A> {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> InstrumentState {
        self.state
    }

    fn gui_parameters(&self) -> Vec<GuiField> {
        vec![
            GuiField::choice("Channel", channel_choices()),
            GuiField::choice("SweepMode", vec!["State", "None"]),
            GuiField::choice("State at start", vec!["As is", "Open", "Closed"]),
            GuiField::choice("State at end", vec!["As is", "Open", "Closed"]),
        ]
    }

    fn apply_gui_parameters(&mut self, parameters: &GuiParameters) -> AppResult<()> {
        let channel = parse_channel(parameters)?;
        let sweep_state = match parameters.string("SweepMode")?.as_str() {
            "State" => true,
            "None" => false,
            other => {
                return Err(DaqError::Configuration(format!(
                    "Unknown sweep mode '{}'",
                    other
                )))
            }
        };
        let start_state = parse_target(parameters, "State at start")?;
        let end_state = parse_target(parameters, "State at end")?;

        self.link.set_channel(channel)?;
        self.sweep_state = sweep_state;
        self.start_state = start_state;
        self.end_state = end_state;
        Ok(())
    }

    fn variables(&self) -> Vec<Variable> {
        // 0 closed, 1 open
        vec![Variable::new("State", "")]
    }

    fn connect(&mut self) -> AppResult<()> {
        let host_id = self.host_id.clone();
        self.link.register_host(&host_id)?;
        self.link.assign_master()?;
        self.link.master_status()?;
        self.state = InstrumentState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) -> AppResult<()> {
        if self.state != InstrumentState::Disconnected {
            self.link.release_master()?;
            self.state = InstrumentState::Disconnected;
        }
        Ok(())
    }

    fn initialize(&mut self) -> AppResult<()> {
        self.state = InstrumentState::Initialized;
        Ok(())
    }

    fn configure(&mut self) -> AppResult<()> {
        if let Some(start) = self.start_state {
            self.set_shutter_state(start)?;
        }
        self.state = InstrumentState::Configured;
        Ok(())
    }

    fn unconfigure(&mut self) -> AppResult<()> {
        if let Some(end) = self.end_state {
            self.set_shutter_state(end)?;
        }
        self.state = InstrumentState::Initialized;
        Ok(())
    }

    fn apply(&mut self, value: &ParameterValue) -> AppResult<()> {
        if self.sweep_state {
            let target = ShutterState::try_from(value)?;
            self.set_shutter_state(target)?;
        }
        Ok(())
    }

    fn call(&mut self) -> AppResult<Sample> {
        let state = self.get_shutter_state()?;
        Ok(Sample::new(&self.id, vec![f64::from(state.code())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::protocol::v2::V2Address;

    #[test]
    fn test_state_inputs() {
        assert_eq!("Open".parse::<ShutterState>().unwrap(), ShutterState::Open);
        assert_eq!("closed".parse::<ShutterState>().unwrap(), ShutterState::Closed);
        assert!("ajar".parse::<ShutterState>().is_err());
        assert_eq!(
            ShutterState::try_from(&ParameterValue::Bool(true)).unwrap(),
            ShutterState::Open
        );
        assert_eq!(
            ShutterState::try_from(&ParameterValue::Float(0.0)).unwrap(),
            ShutterState::Closed
        );
        assert!(ShutterState::try_from(&ParameterValue::Int(2)).is_err());
    }

    #[test]
    fn test_set_state_frame() {
        let mut adapter = MockAdapter::new();
        let address = V2Address { device: 0xC8, host: 0x01 };
        adapter.queue_response(v2::encode(command::SHUTTER.write(), &address, &[0x01, 0x00]).unwrap());
        let mut shutter = Tmc13Shutter::new(adapter);

        shutter.set_shutter_state(ShutterState::Open).unwrap();
        let request = &shutter.link().adapter().written()[0];
        assert_eq!(&request[4..8], &[0x82, 0x07, 0x01, 0x01]);
    }

    #[test]
    fn test_sweep_mode_none_ignores_apply() {
        let mut shutter = Tmc13Shutter::new(MockAdapter::new());
        let mut parameters = GuiParameters::defaults(&shutter.gui_parameters());
        parameters.insert("SweepMode", "None");
        shutter.apply_gui_parameters(&parameters).unwrap();

        shutter.apply(&ParameterValue::from("Open")).unwrap();
        assert!(shutter.link().adapter().written().is_empty());
    }

    #[test]
    fn test_as_is_leaves_shutter_alone() {
        let mut shutter = Tmc13Shutter::new(MockAdapter::new());
        let parameters = GuiParameters::defaults(&shutter.gui_parameters());
        shutter.apply_gui_parameters(&parameters).unwrap();
        shutter.configure().unwrap();
        shutter.unconfigure().unwrap();
        assert!(shutter.link().adapter().written().is_empty());
    }
}
