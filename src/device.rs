use crate::connection::{Transport, read_registers};
use crate::registers::{self, RegisterIndex};
use tracing::debug;

/// Value of [`registers::DEVICE_TYPE_GEO`] on GEO units.
const GEO_IDENTIFICATION: u16 = 8;
/// Value of [`registers::DEVICE_TYPE_AIR9`] on AIR9 units.
const AIR9_IDENTIFICATION: u16 = 9;

/// Hardware variant of the unit, which decides where some logical values live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::IntoStaticStr)]
pub enum DeviceModel {
    #[serde(rename = "GEO")]
    #[strum(serialize = "GEO")]
    Geo,
    #[serde(rename = "AIR9")]
    #[strum(serialize = "AIR9")]
    Air9,
}

impl DeviceModel {
    /// Interpret the two identification probes. GEO wins if both happen to match.
    pub fn from_probes(geo: u16, air9: u16) -> Result<Self, crate::Error> {
        if geo == GEO_IDENTIFICATION {
            Ok(Self::Geo)
        } else if air9 == AIR9_IDENTIFICATION {
            Ok(Self::Air9)
        } else {
            Err(crate::Error::UnknownDevice { geo, air9 })
        }
    }

    pub fn supply_temperature_setpoint(&self) -> RegisterIndex {
        match self {
            Self::Geo => registers::SETPOINT_SUPPLY_TEMPERATURE_GEO,
            Self::Air9 => registers::SETPOINT_SUPPLY_TEMPERATURE_AIR9,
        }
    }

    pub fn supply_flow_temperature(&self) -> RegisterIndex {
        match self {
            Self::Geo => registers::T18_SUPPLY_FLOW_TEMPERATURE_GEO,
            Self::Air9 => registers::T18_SUPPLY_FLOW_TEMPERATURE_AIR9,
        }
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        f.write_str(name)
    }
}

/// Probe the identification registers of the heating module.
///
/// The answer is never cached: every call talks to the unit again.
pub async fn resolve_model<T: Transport>(transport: &T) -> Result<DeviceModel, crate::Error> {
    let probes = [registers::DEVICE_TYPE_GEO, registers::DEVICE_TYPE_AIR9];
    let values = read_registers(transport, &probes).await?;
    let geo = values.word(registers::DEVICE_TYPE_GEO)?;
    let air9 = values.word(registers::DEVICE_TYPE_AIR9)?;
    let model = DeviceModel::from_probes(geo, air9);
    debug!(message = "probed device model", geo, air9, model = ?model.as_ref().ok());
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, Transaction};

    fn probed(geo: u16, air9: u16) -> FakeDevice {
        FakeDevice::new()
            .with(registers::DEVICE_TYPE_GEO, geo)
            .with(registers::DEVICE_TYPE_AIR9, air9)
    }

    #[tokio::test]
    async fn geo_probe_selects_geo_registers() {
        let device = probed(8, 0);
        let model = resolve_model(&device).await.unwrap();
        assert_eq!(model, DeviceModel::Geo);
        assert_eq!(model.supply_temperature_setpoint().address(), 20640);
        assert_eq!(model.supply_flow_temperature().address(), 20653);
        assert_eq!(
            device.transactions(),
            vec![
                Transaction::Read { slave: 4, address: 21839 },
                Transaction::Read { slave: 4, address: 21899 },
            ]
        );
    }

    #[tokio::test]
    async fn air9_probe_selects_air9_registers() {
        let model = resolve_model(&probed(0, 9)).await.unwrap();
        assert_eq!(model, DeviceModel::Air9);
        assert_eq!(model.supply_temperature_setpoint().address(), 20680);
        assert_eq!(model.supply_flow_temperature().address(), 20686);
        assert_eq!(model.to_string(), "AIR9");
    }

    #[tokio::test]
    async fn anything_else_is_an_unknown_device() {
        for (geo, air9) in [(0, 0), (9, 8), (1, 1)] {
            let err = resolve_model(&probed(geo, air9)).await.unwrap_err();
            assert!(
                matches!(err, crate::Error::UnknownDevice { geo: g, air9: a } if g == geo && a == air9),
                "{err:?}"
            );
        }
    }

    #[test]
    fn geo_is_preferred_when_both_probes_match() {
        assert_eq!(DeviceModel::from_probes(8, 9).unwrap(), DeviceModel::Geo);
    }

    #[tokio::test]
    async fn every_call_probes_again() {
        let device = probed(8, 0);
        resolve_model(&device).await.unwrap();
        resolve_model(&device).await.unwrap();
        assert_eq!(device.transactions().len(), 4);
        assert_eq!(device.sessions(), vec![4, 4]);
    }

    #[tokio::test]
    async fn unreachable_unit_is_a_transport_error() {
        let err = resolve_model(&FakeDevice::unreachable()).await.unwrap_err();
        assert!(matches!(err, crate::Error::Transport(_)), "{err:?}");
    }
}
