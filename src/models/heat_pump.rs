//! Heat pump (device type 0xC3) commands, responses and device state.
//!
//! Notes
//! - Responses are dispatched on the first payload byte (the query/control code echoed by the device).
//! - Fields whose meaning is not known are kept verbatim in `ReservedState`.

use crate::models::command::{Command, DeviceResponse, DeviceType, FrameType, ResponseError};
use crate::protocol::frame::Frame;
use chrono::NaiveTime;

// =====================
// Operation codes
// =====================

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ControlType {
    Basic = 0x01,
    DayTimer = 0x02,
    WeeksTimer = 0x03,
    HolidayAway = 0x04,
    Silence = 0x05,
    HolidayHome = 0x06,
    Eco = 0x07,
    Install = 0x08,
    Disinfect = 0x09,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueryType {
    Basic = 0x01,
    DayTimer = 0x02,
    WeeksTimer = 0x03,
    HolidayAway = 0x04,
    Silence = 0x05,
    HolidayHome = 0x06,
    Eco = 0x07,
    Install = 0x08,
    Disinfect = 0x09,
}

// =====================
// Typed field values
// =====================

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RunMode {
    Auto = 1,
    Cool = 2,
    Heat = 3,
    Dhw = 5,
}

impl TryFrom<u8> for RunMode {
    type Error = ResponseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RunMode::Auto),
            2 => Ok(RunMode::Cool),
            3 => Ok(RunMode::Heat),
            5 => Ok(RunMode::Dhw),
            value => Err(ResponseError::InvalidValue { field: "run_mode", value }),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TerminalType {
    FanCoil = 0,
    FloorHeat = 1,
    Radiator = 2,
}

impl TryFrom<u8> for TerminalType {
    type Error = ResponseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TerminalType::FanCoil),
            1 => Ok(TerminalType::FloorHeat),
            2 => Ok(TerminalType::Radiator),
            value => Err(ResponseError::InvalidValue {
                field: "terminal_type",
                value,
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TemperatureType {
    Air,
    Water,
}

impl From<bool> for TemperatureType {
    fn from(water: bool) -> Self {
        if water { TemperatureType::Water } else { TemperatureType::Air }
    }
}

// =====================
// Commands
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCommand {
    query: QueryType,
}

impl QueryCommand {
    pub fn new(query: QueryType) -> Self {
        QueryCommand { query }
    }

    pub fn basic() -> Self {
        QueryCommand::new(QueryType::Basic)
    }

    pub fn eco() -> Self {
        QueryCommand::new(QueryType::Eco)
    }

    pub fn query_type(&self) -> QueryType {
        self.query
    }
}

impl Command for QueryCommand {
    fn device_type(&self) -> DeviceType {
        DeviceType::HeatPump
    }

    fn frame_type(&self) -> FrameType {
        FrameType::Request
    }

    fn payload(&self) -> Vec<u8> {
        vec![self.query as u8]
    }
}

/// Basic control. Payload layout:
///
/// ```text
/// [0] 0x01
/// [1] bit0 zone 1 power, bit1 zone 2 power, bit2 DHW power,
///     bit3 zone 1 curve, bit4 zone 2 curve, bit5 TBH, bit6 fast DHW
/// [2] zone 1 target, [3] zone 2 target, [4] DHW target (°C)
/// [5] room target in 0.5 °C steps
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ControlBasicCommand {
    pub zone1_power_state: bool,
    pub zone2_power_state: bool,
    pub dhw_power_state: bool,
    pub zone1_curve_state: bool,
    pub zone2_curve_state: bool,
    pub tbh_state: bool,
    pub fast_dhw_state: bool,
    pub zone1_target_temperature: u8,
    pub zone2_target_temperature: u8,
    pub dhw_target_temperature: u8,
    pub room_target_temperature: f32,
}

impl ControlBasicCommand {
    /// Start from the current device state so unchanged settings are resent as-is.
    pub fn from_state(state: &HeatPumpState) -> Self {
        let [zone1, zone2] = &state.zones;
        ControlBasicCommand {
            zone1_power_state: zone1.power_state,
            zone2_power_state: zone2.power_state,
            dhw_power_state: state.dhw.power_state,
            zone1_curve_state: zone1.curve_state,
            zone2_curve_state: zone2.curve_state,
            tbh_state: state.tbh_state,
            fast_dhw_state: state.fast_dhw_state,
            zone1_target_temperature: zone1.target_temperature,
            zone2_target_temperature: zone2.target_temperature,
            dhw_target_temperature: state.dhw.target_temperature,
            room_target_temperature: state.room.target_temperature,
        }
    }
}

impl Command for ControlBasicCommand {
    fn device_type(&self) -> DeviceType {
        DeviceType::HeatPump
    }

    fn frame_type(&self) -> FrameType {
        FrameType::Control
    }

    fn payload(&self) -> Vec<u8> {
        let flags = [
            self.zone1_power_state,
            self.zone2_power_state,
            self.dhw_power_state,
            self.zone1_curve_state,
            self.zone2_curve_state,
            self.tbh_state,
            self.fast_dhw_state,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |acc, (bit, on)| acc | ((*on as u8) << bit));

        vec![
            ControlType::Basic as u8,
            flags,
            self.zone1_target_temperature,
            self.zone2_target_temperature,
            self.dhw_target_temperature,
            (self.room_target_temperature * 2.0).round().clamp(0.0, 255.0) as u8,
        ]
    }
}

// =====================
// Responses
// =====================

fn bit(byte: u8, mask: u8) -> bool {
    byte & mask != 0
}

fn require_len(payload: &[u8], expected: usize) -> Result<(), ResponseError> {
    if payload.len() < expected {
        return Err(ResponseError::TooShort {
            tag: payload.first().copied().unwrap_or_default(),
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneReport {
    pub power_state: bool,
    pub curve_state: bool,
    pub temperature_type: TemperatureType,
    pub terminal_type: TerminalType,
    pub target_temperature: u8,
    pub heat_max_temperature: u8,
    pub heat_min_temperature: u8,
    pub cool_max_temperature: u8,
    pub cool_min_temperature: u8,
}

/// Bytes and bits whose semantics are not modelled yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedState {
    /// Raw byte 3 low nibble: time set, silence, holiday and eco flags.
    pub mode_flags: u8,
    pub remote_on_off: bool,
    pub run_mode_under_auto: u8,
    pub error_code: u8,
    pub trailing: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicResponse {
    /// `None` when the device reports run mode 0, which has no known meaning.
    pub run_mode: Option<RunMode>,
    pub heat_enable: bool,
    pub cool_enable: bool,
    pub dhw_enable: bool,
    pub zone2_enable: bool,
    pub zones: [ZoneReport; 2],
    pub tbh_state: bool,
    pub fast_dhw_state: bool,
    pub dhw_power_state: bool,
    pub dhw_target_temperature: u8,
    pub dhw_max_temperature: u8,
    pub dhw_min_temperature: u8,
    pub room_thermostat_enable: bool,
    pub room_thermostat_power_state: bool,
    pub room_target_temperature: f32,
    pub room_max_temperature: f32,
    pub room_min_temperature: f32,
    pub tank_temperature: u8,
    pub reserved: ReservedState,
}

impl BasicResponse {
    pub const LEN: usize = 24;

    fn parse(payload: &[u8]) -> Result<Self, ResponseError> {
        require_len(payload, Self::LEN)?;

        let run_mode = match payload[4] {
            0 => None,
            value => Some(RunMode::try_from(value)?),
        };

        let zone1 = ZoneReport {
            power_state: bit(payload[1], 0x01),
            curve_state: bit(payload[1], 0x08),
            temperature_type: bit(payload[2], 0x10).into(),
            terminal_type: TerminalType::try_from((payload[3] & 0x30) >> 4)?,
            target_temperature: payload[6],
            heat_max_temperature: payload[10],
            heat_min_temperature: payload[11],
            cool_max_temperature: payload[12],
            cool_min_temperature: payload[13],
        };
        let zone2 = ZoneReport {
            power_state: bit(payload[1], 0x02),
            curve_state: bit(payload[1], 0x10),
            temperature_type: bit(payload[2], 0x20).into(),
            terminal_type: TerminalType::try_from((payload[3] & 0xc0) >> 6)?,
            target_temperature: payload[7],
            heat_max_temperature: payload[14],
            heat_min_temperature: payload[15],
            cool_max_temperature: payload[16],
            cool_min_temperature: payload[17],
        };

        Ok(BasicResponse {
            run_mode,
            heat_enable: bit(payload[2], 0x01),
            cool_enable: bit(payload[2], 0x02),
            dhw_enable: bit(payload[2], 0x04),
            zone2_enable: bit(payload[2], 0x08),
            zones: [zone1, zone2],
            tbh_state: bit(payload[1], 0x20),
            fast_dhw_state: bit(payload[1], 0x40),
            dhw_power_state: bit(payload[1], 0x04),
            dhw_target_temperature: payload[8],
            dhw_max_temperature: payload[20],
            dhw_min_temperature: payload[21],
            room_thermostat_enable: bit(payload[2], 0x80),
            room_thermostat_power_state: bit(payload[2], 0x40),
            room_target_temperature: payload[9] as f32 / 2.0,
            room_max_temperature: payload[18] as f32 / 2.0,
            room_min_temperature: payload[19] as f32 / 2.0,
            tank_temperature: payload[22],
            reserved: ReservedState {
                mode_flags: payload[3] & 0x0f,
                remote_on_off: bit(payload[1], 0x80),
                run_mode_under_auto: payload[5],
                error_code: payload[23],
                trailing: payload[Self::LEN..].to_vec(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcoResponse {
    pub function_state: bool,
    pub timer_state: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl EcoResponse {
    pub const LEN: usize = 6;

    fn parse(payload: &[u8]) -> Result<Self, ResponseError> {
        require_len(payload, Self::LEN)?;

        let time = |hour: u8, minute: u8| {
            NaiveTime::from_hms_opt(hour as u32, minute as u32, 0).ok_or(ResponseError::InvalidValue {
                field: if hour >= 24 { "eco_hour" } else { "eco_minute" },
                value: if hour >= 24 { hour } else { minute },
            })
        };

        Ok(EcoResponse {
            function_state: bit(payload[1], 0x01),
            timer_state: bit(payload[1], 0x02),
            start: time(payload[2], payload[3])?,
            end: time(payload[4], payload[5])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Basic(BasicResponse),
    Eco(EcoResponse),
    Unknown { frame_type: u8, tag: u8, payload: Vec<u8> },
}

impl DeviceResponse for Response {
    fn decode(frame: &Frame) -> Result<Self, ResponseError> {
        if frame.device_type != DeviceType::HeatPump as u8 {
            return Err(ResponseError::WrongDeviceType(frame.device_type));
        }
        let payload = frame.payload.as_slice();
        let tag = *payload.first().ok_or(ResponseError::Empty)?;
        let frame_type = FrameType::try_from(frame.frame_type);

        match (frame_type, tag) {
            (Ok(FrameType::Request | FrameType::Control | FrameType::Report), 0x01) => {
                BasicResponse::parse(payload).map(Response::Basic)
            }
            (Ok(FrameType::Request | FrameType::Control | FrameType::Report), 0x07) => {
                EcoResponse::parse(payload).map(Response::Eco)
            }
            _ => Ok(Response::Unknown {
                frame_type: frame.frame_type,
                tag,
                payload: payload.to_vec(),
            }),
        }
    }

    fn is_known(&self) -> bool {
        !matches!(self, Response::Unknown { .. })
    }
}

// =====================
// Device state
// =====================

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneState {
    pub power_state: bool,
    pub curve_state: bool,
    pub temperature_type: Option<TemperatureType>,
    pub terminal_type: Option<TerminalType>,
    pub target_temperature: u8,
    pub min_heat_temperature: u8,
    pub max_heat_temperature: u8,
    pub min_cool_temperature: u8,
    pub max_cool_temperature: u8,
}

impl Default for ZoneState {
    fn default() -> Self {
        ZoneState {
            power_state: false,
            curve_state: false,
            temperature_type: None,
            terminal_type: None,
            target_temperature: 25,
            min_heat_temperature: 25,
            max_heat_temperature: 55,
            min_cool_temperature: 5,
            max_cool_temperature: 25,
        }
    }
}

impl ZoneState {
    fn apply(&mut self, report: &ZoneReport) {
        self.power_state = report.power_state;
        self.curve_state = report.curve_state;
        self.temperature_type = Some(report.temperature_type);
        self.terminal_type = Some(report.terminal_type);
        self.target_temperature = report.target_temperature;
        self.min_heat_temperature = report.heat_min_temperature;
        self.max_heat_temperature = report.heat_max_temperature;
        self.min_cool_temperature = report.cool_min_temperature;
        self.max_cool_temperature = report.cool_max_temperature;
    }
}

/// Domestic hot water.
#[derive(Debug, Clone, PartialEq)]
pub struct DhwState {
    pub enable: bool,
    pub power_state: bool,
    pub target_temperature: u8,
    pub min_temperature: u8,
    pub max_temperature: u8,
}

impl Default for DhwState {
    fn default() -> Self {
        DhwState {
            enable: false,
            power_state: false,
            target_temperature: 25,
            min_temperature: 20,
            max_temperature: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomThermostatState {
    pub enable: bool,
    pub power_state: bool,
    pub target_temperature: f32,
    pub min_temperature: f32,
    pub max_temperature: f32,
}

impl Default for RoomThermostatState {
    fn default() -> Self {
        RoomThermostatState {
            enable: false,
            power_state: false,
            target_temperature: 25.0,
            min_temperature: 17.0,
            max_temperature: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EcoState {
    pub function_state: bool,
    pub timer_state: bool,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatPumpState {
    pub run_mode: Option<RunMode>,
    pub heat_enable: bool,
    pub cool_enable: bool,
    pub zone2_enable: bool,
    pub zones: [ZoneState; 2],
    pub dhw: DhwState,
    pub room: RoomThermostatState,
    pub tbh_state: bool,
    pub fast_dhw_state: bool,
    pub tank_temperature: Option<u8>,
    pub eco: EcoState,
    pub reserved: ReservedState,
}

impl HeatPumpState {
    /// Copy the fields carried by `response`; everything else is left untouched.
    pub fn apply(&mut self, response: &Response) {
        match response {
            Response::Basic(res) => self.apply_basic(res),
            Response::Eco(res) => self.apply_eco(res),
            Response::Unknown { .. } => {}
        }
    }

    fn apply_basic(&mut self, res: &BasicResponse) {
        self.run_mode = res.run_mode;
        self.heat_enable = res.heat_enable;
        self.cool_enable = res.cool_enable;
        self.zone2_enable = res.zone2_enable;

        for (zone, report) in self.zones.iter_mut().zip(&res.zones) {
            zone.apply(report);
        }

        self.dhw.enable = res.dhw_enable;
        self.dhw.power_state = res.dhw_power_state;
        self.dhw.target_temperature = res.dhw_target_temperature;
        self.dhw.min_temperature = res.dhw_min_temperature;
        self.dhw.max_temperature = res.dhw_max_temperature;

        self.room.enable = res.room_thermostat_enable;
        self.room.power_state = res.room_thermostat_power_state;
        self.room.target_temperature = res.room_target_temperature;
        self.room.min_temperature = res.room_min_temperature;
        self.room.max_temperature = res.room_max_temperature;

        self.tbh_state = res.tbh_state;
        self.fast_dhw_state = res.fast_dhw_state;
        self.tank_temperature = Some(res.tank_temperature);
        self.reserved = res.reserved.clone();
    }

    fn apply_eco(&mut self, res: &EcoResponse) {
        self.eco.function_state = res.function_state;
        self.eco.timer_state = res.timer_state;
        self.eco.start = Some(res.start);
        self.eco.end = Some(res.end);
    }
}
