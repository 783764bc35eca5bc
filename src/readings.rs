use crate::connection::{Transport, read_registers};
use crate::device::resolve_model;
use crate::registers::{self, RegisterIndex};
use tracing::{debug, info};

/// Sensor values of the unit. Temperatures are in tenths of °C, humidity in %.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Readings {
    pub room_temperature: i16,
    pub outdoor_temperature: i16,
    pub average_humidity: u16,
    pub actual_humidity: u16,
    #[serde(rename = "DHWTankTopTemperature")]
    pub dhw_tank_top_temperature: i16,
    #[serde(rename = "DHWTankBottomTemperature")]
    pub dhw_tank_bottom_temperature: i16,
    pub supply_flow_temperature: i16,
}

impl Readings {
    /// Field names and human readable values, in declaration order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let celsius = |v: i16| format!("{} °C", v as f32 / 10.0);
        let percent = |v: u16| format!("{v} %");
        vec![
            ("RoomTemperature", celsius(self.room_temperature)),
            ("OutdoorTemperature", celsius(self.outdoor_temperature)),
            ("AverageHumidity", percent(self.average_humidity)),
            ("ActualHumidity", percent(self.actual_humidity)),
            ("DHWTankTopTemperature", celsius(self.dhw_tank_top_temperature)),
            ("DHWTankBottomTemperature", celsius(self.dhw_tank_bottom_temperature)),
            ("SupplyFlowTemperature", celsius(self.supply_flow_temperature)),
        ]
    }
}

/// Which sensor the unit is configured to treat as the room temperature.
pub fn room_temperature_source(master_sensor_setting: u16) -> RegisterIndex {
    match master_sensor_setting {
        0 => registers::T3_EXTRACT_AIR_TEMPERATURE,
        _ => registers::TEXT_ROOM_TEMPERATURE,
    }
}

/// Read all the sensors.
///
/// Each register is read in its own transaction, so the values are not a snapshot taken at a
/// single point in time.
pub async fn fetch_readings<T: Transport>(transport: &T) -> Result<Readings, crate::Error> {
    let setting = read_registers(transport, &[registers::MASTER_TEMPERATURE_SENSOR_SETTING])
        .await?
        .word(registers::MASTER_TEMPERATURE_SENSOR_SETTING)?;
    let room_register = room_temperature_source(setting);
    debug!(message = "room temperature source", setting, register = room_register.name());
    let flow_register = resolve_model(transport).await?.supply_flow_temperature();

    let values = read_registers(
        transport,
        &[
            room_register,
            registers::OUTDOOR_TEMPERATURE,
            registers::AVERAGE_HUMIDITY,
            registers::ACTUAL_HUMIDITY,
            registers::DHW_TANK_TOP_TEMPERATURE,
            registers::DHW_TANK_BOTTOM_TEMPERATURE,
            flow_register,
        ],
    )
    .await?;
    let readings = Readings {
        room_temperature: values.word(room_register)? as i16,
        outdoor_temperature: values.word(registers::OUTDOOR_TEMPERATURE)? as i16,
        average_humidity: values.word(registers::AVERAGE_HUMIDITY)?,
        actual_humidity: values.word(registers::ACTUAL_HUMIDITY)?,
        dhw_tank_top_temperature: values.word(registers::DHW_TANK_TOP_TEMPERATURE)? as i16,
        dhw_tank_bottom_temperature: values.word(registers::DHW_TANK_BOTTOM_TEMPERATURE)? as i16,
        supply_flow_temperature: values.word(flow_register)? as i16,
    };
    info!(message = "fetched readings", ?readings);
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, Transaction};

    fn geo_unit(master_sensor_setting: u16) -> FakeDevice {
        FakeDevice::new()
            .with(registers::MASTER_TEMPERATURE_SENSOR_SETTING, master_sensor_setting)
            .with(registers::T3_EXTRACT_AIR_TEMPERATURE, 215)
            .with(registers::TEXT_ROOM_TEMPERATURE, 198)
            .with(registers::OUTDOOR_TEMPERATURE, 50)
            .with(registers::AVERAGE_HUMIDITY, 45)
            .with(registers::ACTUAL_HUMIDITY, 48)
            .with(registers::DHW_TANK_TOP_TEMPERATURE, 550)
            .with(registers::DHW_TANK_BOTTOM_TEMPERATURE, 480)
            .with(registers::DEVICE_TYPE_GEO, 8)
            .with(registers::DEVICE_TYPE_AIR9, 0)
            .with(registers::T18_SUPPLY_FLOW_TEMPERATURE_GEO, 600)
            .with(registers::T18_SUPPLY_FLOW_TEMPERATURE_AIR9, 610)
    }

    #[tokio::test]
    async fn fetches_a_geo_unit_with_the_extract_air_sensor() {
        let device = geo_unit(0);
        let readings = fetch_readings(&device).await.unwrap();
        assert_eq!(
            readings,
            Readings {
                room_temperature: 215,
                outdoor_temperature: 50,
                average_humidity: 45,
                actual_humidity: 48,
                dhw_tank_top_temperature: 550,
                dhw_tank_bottom_temperature: 480,
                supply_flow_temperature: 600,
            }
        );
        let transactions = device.transactions();
        assert!(transactions.contains(&Transaction::Read { slave: 1, address: 20286 }));
        assert!(!transactions.contains(&Transaction::Read { slave: 1, address: 20280 }));
        assert!(transactions.contains(&Transaction::Read { slave: 4, address: 20653 }));
        assert!(device.writes().is_empty());
        assert_eq!(device.closed_sessions(), device.sessions().len());
    }

    #[tokio::test]
    async fn text_sensor_setting_reads_the_room_sensor() {
        let device = geo_unit(1);
        let readings = fetch_readings(&device).await.unwrap();
        assert_eq!(readings.room_temperature, 198);
        let transactions = device.transactions();
        assert!(transactions.contains(&Transaction::Read { slave: 1, address: 20280 }));
        assert!(!transactions.contains(&Transaction::Read { slave: 1, address: 20286 }));
    }

    #[tokio::test]
    async fn air9_unit_reads_its_own_flow_register() {
        let device = geo_unit(0)
            .with(registers::DEVICE_TYPE_GEO, 0)
            .with(registers::DEVICE_TYPE_AIR9, 9);
        let readings = fetch_readings(&device).await.unwrap();
        assert_eq!(readings.supply_flow_temperature, 610);
    }

    #[tokio::test]
    async fn negative_outdoor_temperature() {
        let device = geo_unit(0).with(registers::OUTDOOR_TEMPERATURE, (-125i16) as u16);
        let readings = fetch_readings(&device).await.unwrap();
        assert_eq!(readings.outdoor_temperature, -125);
    }

    #[tokio::test]
    async fn unknown_model_aborts_the_fetch() {
        let device = geo_unit(0).with(registers::DEVICE_TYPE_GEO, 3);
        let err = fetch_readings(&device).await.unwrap_err();
        assert!(matches!(err, crate::Error::UnknownDevice { geo: 3, air9: 0 }), "{err:?}");
    }

    #[test]
    fn serializes_with_domain_names() {
        let readings = Readings {
            room_temperature: 215,
            outdoor_temperature: -5,
            average_humidity: 45,
            actual_humidity: 48,
            dhw_tank_top_temperature: 550,
            dhw_tank_bottom_temperature: 480,
            supply_flow_temperature: 600,
        };
        let json = serde_json::to_value(readings).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "RoomTemperature": 215,
                "OutdoorTemperature": -5,
                "AverageHumidity": 45,
                "ActualHumidity": 48,
                "DHWTankTopTemperature": 550,
                "DHWTankBottomTemperature": 480,
                "SupplyFlowTemperature": 600,
            })
        );
        assert_eq!(readings.fields()[1], ("OutdoorTemperature", "-0.5 °C".to_string()));
    }
}
