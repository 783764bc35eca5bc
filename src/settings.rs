use crate::connection::{Transport, read_registers, write_registers};
use crate::device::resolve_model;
use crate::modbus::ProtocolError;
use crate::registers::{self, RegisterIndex, Value};
use tracing::info;

/// Ventilation intensity, from the lowest (101) to the highest (104).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::FromRepr,
    strum::VariantArray,
    strum::IntoStaticStr,
    clap::ValueEnum,
)]
#[repr(u16)]
#[serde(try_from = "u16", into = "u16")]
pub enum FanSpeed {
    Low = 101,
    Normal = 102,
    High = 103,
    VeryHigh = 104,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{0} is not a fan speed (expected 101 to 104)")]
pub struct InvalidFanSpeed(pub u16);

impl From<FanSpeed> for u16 {
    fn from(value: FanSpeed) -> u16 {
        value as u16
    }
}

impl TryFrom<u16> for FanSpeed {
    type Error = InvalidFanSpeed;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_repr(value).ok_or(InvalidFanSpeed(value))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::IntoStaticStr, clap::ValueEnum,
)]
#[repr(u16)]
pub enum VentilationMode {
    Auto = 0,
    Cooling = 1,
    Heating = 2,
}

/// A partial view of the unit's settings.
///
/// When sending, only the fields that are present get written. When fetching, all of them are.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<FanSpeed>,
    /// Tenths of °C, 5 to 40 °C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_room_temperature: Option<i16>,
    /// Tenths of °C, 10 to 60 °C.
    #[serde(rename = "DesiredDHWTemperature", skip_serializing_if = "Option::is_none")]
    pub desired_dhw_temperature: Option<i16>,
    #[serde(rename = "DHWProductionPaused", skip_serializing_if = "Option::is_none")]
    pub dhw_production_paused: Option<bool>,
    /// Minutes, 1 to 180.
    #[serde(rename = "DHWProductionPauseDuration", skip_serializing_if = "Option::is_none")]
    pub dhw_production_pause_duration: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub central_heating_paused: Option<bool>,
    /// Minutes, 1 to 180.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub central_heating_pause_duration: Option<u16>,
    /// Raw [`VentilationMode`] value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ventilation_mode: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ventilation_on_pause: Option<bool>,
    /// Whole °C, 5 to 50.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint_supply_temperature: Option<i16>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange { field: &'static str, value: i32, min: i32, max: i32 },
    #[error("VentilationMode must be 0 (auto), 1 (cooling) or 2 (heating), got {0}")]
    VentilationMode(u16),
}

fn check_range(
    field: &'static str,
    register: RegisterIndex,
    value: impl Into<i32>,
) -> Result<(), ValidationError> {
    let value = value.into();
    if register.accepts(value) {
        return Ok(());
    }
    Err(ValidationError::OutOfRange {
        field,
        value,
        min: register.minimum_value().map_or(i32::MIN, Value::to_i32),
        max: register.maximum_value().map_or(i32::MAX, Value::to_i32),
    })
}

impl Settings {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fill in the fields that are absent here with those from `other`.
    pub fn or(self, other: Settings) -> Settings {
        Settings {
            fan_speed: self.fan_speed.or(other.fan_speed),
            desired_room_temperature: self
                .desired_room_temperature
                .or(other.desired_room_temperature),
            desired_dhw_temperature: self.desired_dhw_temperature.or(other.desired_dhw_temperature),
            dhw_production_paused: self.dhw_production_paused.or(other.dhw_production_paused),
            dhw_production_pause_duration: self
                .dhw_production_pause_duration
                .or(other.dhw_production_pause_duration),
            central_heating_paused: self.central_heating_paused.or(other.central_heating_paused),
            central_heating_pause_duration: self
                .central_heating_pause_duration
                .or(other.central_heating_pause_duration),
            ventilation_mode: self.ventilation_mode.or(other.ventilation_mode),
            ventilation_on_pause: self.ventilation_on_pause.or(other.ventilation_on_pause),
            setpoint_supply_temperature: self
                .setpoint_supply_temperature
                .or(other.setpoint_supply_temperature),
        }
    }

    /// Validate the present fields and translate them into register writes.
    ///
    /// Nothing is returned unless every present field is valid.
    pub fn to_writes(&self) -> Result<Vec<(RegisterIndex, u16)>, ValidationError> {
        let mut writes = Vec::new();
        if let Some(fan_speed) = self.fan_speed {
            writes.push((registers::FAN_SPEED, u16::from(fan_speed)));
        }
        if let Some(temperature) = self.desired_room_temperature {
            let register = registers::DESIRED_ROOM_TEMPERATURE;
            check_range("DesiredRoomTemperature", register, temperature)?;
            writes.push((register, temperature as u16));
        }
        if let Some(temperature) = self.desired_dhw_temperature {
            let register = registers::DHW_SET_POINT;
            check_range("DesiredDHWTemperature", register, temperature)?;
            writes.push((register, temperature as u16));
        }
        if let Some(paused) = self.dhw_production_paused {
            writes.push((registers::DHW_PAUSE, u16::from(paused)));
        }
        if let Some(duration) = self.dhw_production_pause_duration {
            let register = registers::DHW_PAUSE_DURATION;
            check_range("DHWProductionPauseDuration", register, duration)?;
            writes.push((register, duration));
        }
        if let Some(paused) = self.central_heating_paused {
            writes.push((registers::CENTRAL_HEATING_PAUSE, u16::from(paused)));
        }
        if let Some(duration) = self.central_heating_pause_duration {
            let register = registers::CENTRAL_HEATING_PAUSE_DURATION;
            check_range("CentralHeatingPauseDuration", register, duration)?;
            writes.push((register, duration));
        }
        if let Some(mode) = self.ventilation_mode {
            let mode = VentilationMode::from_repr(mode).ok_or(ValidationError::VentilationMode(mode))?;
            writes.push((registers::VENTILATION_MODE, mode as u16));
        }
        if let Some(paused) = self.ventilation_on_pause {
            writes.push((registers::VENTILATION_PAUSE, u16::from(paused)));
        }
        if let Some(temperature) = self.setpoint_supply_temperature {
            // Written for both models, so the model does not need to be known.
            let geo = registers::SETPOINT_SUPPLY_TEMPERATURE_GEO;
            let air9 = registers::SETPOINT_SUPPLY_TEMPERATURE_AIR9;
            check_range("SetpointSupplyTemperature", geo, temperature)?;
            writes.push((geo, temperature as u16));
            writes.push((air9, temperature as u16));
        }
        Ok(writes)
    }

    /// Field names and human readable values of the present fields.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let celsius = |v: i16| format!("{} °C", v as f32 / 10.0);
        let minutes = |v: u16| format!("{v} min");
        let mut fields = Vec::new();
        if let Some(v) = self.fan_speed {
            let name: &'static str = v.into();
            fields.push(("FanSpeed", format!("{name} ({})", u16::from(v))));
        }
        if let Some(v) = self.desired_room_temperature {
            fields.push(("DesiredRoomTemperature", celsius(v)));
        }
        if let Some(v) = self.desired_dhw_temperature {
            fields.push(("DesiredDHWTemperature", celsius(v)));
        }
        if let Some(v) = self.dhw_production_paused {
            fields.push(("DHWProductionPaused", v.to_string()));
        }
        if let Some(v) = self.dhw_production_pause_duration {
            fields.push(("DHWProductionPauseDuration", minutes(v)));
        }
        if let Some(v) = self.central_heating_paused {
            fields.push(("CentralHeatingPaused", v.to_string()));
        }
        if let Some(v) = self.central_heating_pause_duration {
            fields.push(("CentralHeatingPauseDuration", minutes(v)));
        }
        if let Some(v) = self.ventilation_mode {
            let name = VentilationMode::from_repr(v).map_or("?", Into::into);
            fields.push(("VentilationMode", format!("{name} ({v})")));
        }
        if let Some(v) = self.ventilation_on_pause {
            fields.push(("VentilationOnPause", v.to_string()));
        }
        if let Some(v) = self.setpoint_supply_temperature {
            fields.push(("SetpointSupplyTemperature", format!("{v} °C")));
        }
        fields
    }
}

/// Read every setting from the unit.
pub async fn fetch_settings<T: Transport>(transport: &T) -> Result<Settings, crate::Error> {
    let setpoint_register = resolve_model(transport).await?.supply_temperature_setpoint();
    let values = read_registers(
        transport,
        &[
            registers::FAN_SPEED,
            registers::DESIRED_ROOM_TEMPERATURE,
            registers::DHW_SET_POINT,
            registers::DHW_PAUSE,
            registers::DHW_PAUSE_DURATION,
            registers::VENTILATION_MODE,
            registers::VENTILATION_PAUSE,
            registers::CENTRAL_HEATING_PAUSE,
            registers::CENTRAL_HEATING_PAUSE_DURATION,
            setpoint_register,
        ],
    )
    .await?;
    let fan_speed = values.word(registers::FAN_SPEED)?;
    let fan_speed = FanSpeed::try_from(fan_speed).map_err(|_| ProtocolError::OutOfDomain {
        register: registers::FAN_SPEED,
        value: fan_speed,
    })?;
    let settings = Settings {
        fan_speed: Some(fan_speed),
        desired_room_temperature: Some(values.word(registers::DESIRED_ROOM_TEMPERATURE)? as i16),
        desired_dhw_temperature: Some(values.word(registers::DHW_SET_POINT)? as i16),
        dhw_production_paused: Some(values.word(registers::DHW_PAUSE)? == 1),
        dhw_production_pause_duration: Some(values.word(registers::DHW_PAUSE_DURATION)?),
        central_heating_paused: Some(values.word(registers::CENTRAL_HEATING_PAUSE)? == 1),
        central_heating_pause_duration: Some(
            values.word(registers::CENTRAL_HEATING_PAUSE_DURATION)?,
        ),
        ventilation_mode: Some(values.word(registers::VENTILATION_MODE)?),
        ventilation_on_pause: Some(values.word(registers::VENTILATION_PAUSE)? == 1),
        setpoint_supply_temperature: Some(values.word(setpoint_register)? as i16),
    };
    info!(message = "fetched settings", ?settings);
    Ok(settings)
}

/// Write the present fields of `settings` to the unit.
///
/// Validation happens before anything is sent. Should a write fail, the remaining writes are not
/// attempted and the ones before it stay in effect.
pub async fn send_settings<T: Transport>(
    transport: &T,
    settings: &Settings,
) -> Result<(), crate::Error> {
    let writes = settings.to_writes().map_err(crate::Error::Validation)?;
    info!(message = "sending settings", ?settings, writes = writes.len());
    write_registers(transport, &writes).await
}
