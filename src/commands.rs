/// A single-threaded runtime: sessions are strictly sequential, so there is nothing to spread
/// across threads.
fn runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod registers {
    use crate::output;
    use crate::registers::{Mode, RegisterIndex, SlaveId, Value};

    /// Search and output known modbus registers.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list registers whose name, description or address contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the register list")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub address: u16,
        pub slave: SlaveId,
        pub name: &'static str,
        pub mode: Mode,
        pub signed: bool,
        pub scale: u8,
        pub minimum: Option<Value>,
        pub maximum: Option<Value>,
        pub description: &'static str,
    }

    impl RegisterSchema {
        pub fn all_registers() -> impl Iterator<Item = Self> {
            RegisterIndex::all().map(|register| {
                let data_type = register.data_type();
                RegisterSchema {
                    address: register.address(),
                    slave: register.slave(),
                    name: register.name(),
                    mode: register.mode(),
                    signed: data_type.is_signed(),
                    scale: data_type.scale(),
                    minimum: register.minimum_value(),
                    maximum: register.maximum_value(),
                    description: register.description(),
                }
            })
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.name.contains(&pattern)
                || self.description.to_uppercase().contains(&pattern)
                || self.address.to_string().contains(&pattern)
        }

        fn table_row(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.slave.to_string(),
                self.name.to_string(),
                self.mode.to_string(),
                if self.signed { "i16".to_string() } else { "u16".to_string() },
                self.scale.to_string(),
                self.minimum.map(|v| v.to_string()).unwrap_or_default(),
                self.maximum.map(|v| v.to_string()).unwrap_or_default(),
                self.description.to_string(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output()?;
        output.table_headers(vec![
            "Address",
            "Slave",
            "Name",
            "Mode",
            "Type",
            "Scale",
            "Min",
            "Max",
            "Description",
        ])?;
        for register in RegisterSchema::all_registers() {
            if let Some(pattern) = &args.filter {
                if !register.is_match(pattern) {
                    continue;
                }
            }
            output.result(|| register.table_row(), || &register)?;
        }
        output.commit()?;
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn filter_matches_name_description_and_address() {
            let fan_speed = RegisterSchema::all_registers()
                .find(|r| r.name == "FAN_SPEED")
                .unwrap();
            assert!(fan_speed.is_match("fan_speed"));
            assert!(fan_speed.is_match("2014"));
            assert!(!fan_speed.is_match("humidity"));
            assert_eq!(fan_speed.table_row()[1], "1");
            let humidity = RegisterSchema::all_registers().filter(|r| r.is_match("HUMIDITY"));
            assert_eq!(humidity.count(), 2);
        }
    }
}

pub mod read {
    use crate::connection::{self, TcpTransport, read_registers};
    use crate::output;
    use crate::registers::{RegisterIndex, SlaveId, Value};

    /// Read registers from the unit and output their values.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Register names or addresses, as listed by the `registers` command.
        #[arg(required = true)]
        registers: Vec<String>,
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("`{0}` is not a known register name or address")]
        UnknownRegister(String),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not read the registers")]
        Read(#[source] crate::Error),
        #[error("could not output the register values")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct Reading {
        address: u16,
        slave: SlaveId,
        name: &'static str,
        value: Value,
        raw: u16,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let registers = args
            .registers
            .iter()
            .map(|r| RegisterIndex::parse(r).ok_or_else(|| Error::UnknownRegister(r.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let transport = TcpTransport::new(&args.connection);
        let values = super::runtime()
            .map_err(Error::Runtime)?
            .block_on(read_registers(&transport, &registers))
            .map_err(Error::Read)?;
        let mut output = args.output.to_output()?;
        output.table_headers(vec!["Address", "Slave", "Name", "Value", "Raw"])?;
        for (register, value) in values.iter() {
            let reading = Reading {
                address: register.address(),
                slave: register.slave(),
                name: register.name(),
                value,
                raw: value.into_inner(),
            };
            output.result(
                || {
                    vec![
                        reading.address.to_string(),
                        reading.slave.to_string(),
                        reading.name.to_string(),
                        reading.value.to_string(),
                        reading.raw.to_string(),
                    ]
                },
                || &reading,
            )?;
        }
        output.commit()?;
        Ok(())
    }
}

pub mod model {
    use crate::connection::{self, TcpTransport};
    use crate::device::{DeviceModel, resolve_model};
    use crate::output;

    /// Identify the hardware variant of the unit.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not identify the device model")]
        Resolve(#[source] crate::Error),
        #[error("could not output the device model")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct ModelRecord {
        model: DeviceModel,
        supply_temperature_setpoint: u16,
        supply_flow_temperature: u16,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let transport = TcpTransport::new(&args.connection);
        let model = super::runtime()
            .map_err(Error::Runtime)?
            .block_on(resolve_model(&transport))
            .map_err(Error::Resolve)?;
        let setpoint = model.supply_temperature_setpoint();
        let flow = model.supply_flow_temperature();
        let record = ModelRecord {
            model,
            supply_temperature_setpoint: setpoint.address(),
            supply_flow_temperature: flow.address(),
        };
        let mut output = args.output.to_output()?;
        output.record(
            vec![
                ("Model", model.to_string()),
                ("SupplyTemperatureSetpoint", setpoint.to_string()),
                ("SupplyFlowTemperature", flow.to_string()),
            ],
            &record,
        )?;
        output.commit()?;
        Ok(())
    }
}

pub mod readings {
    use crate::connection::{self, TcpTransport};
    use crate::output;
    use crate::readings::fetch_readings;

    /// Fetch the current sensor values of the unit.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not fetch the readings")]
        Fetch(#[source] crate::Error),
        #[error("could not output the readings")]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let transport = TcpTransport::new(&args.connection);
        let readings = super::runtime()
            .map_err(Error::Runtime)?
            .block_on(fetch_readings(&transport))
            .map_err(Error::Fetch)?;
        let mut output = args.output.to_output()?;
        output.record(readings.fields(), &readings)?;
        output.commit()?;
        Ok(())
    }
}

pub mod settings {
    use crate::connection::{self, TcpTransport};
    use crate::output;
    use crate::settings::fetch_settings;

    /// Fetch the current settings of the unit.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not fetch the settings")]
        Fetch(#[source] crate::Error),
        #[error("could not output the settings")]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let transport = TcpTransport::new(&args.connection);
        let settings = super::runtime()
            .map_err(Error::Runtime)?
            .block_on(fetch_settings(&transport))
            .map_err(Error::Fetch)?;
        let mut output = args.output.to_output()?;
        output.record(settings.fields(), &settings)?;
        output.commit()?;
        Ok(())
    }
}

pub mod set {
    use crate::connection::{self, TcpTransport};
    use crate::settings::{FanSpeed, Settings, VentilationMode, send_settings};
    use tracing::info;

    /// Change some of the unit's settings. Settings that are not mentioned are left alone.
    #[derive(clap::Parser)]
    pub struct Args {
        /// A JSON object with the settings to change, as output by `settings --format=jsonl`.
        ///
        /// The other options take precedence over the fields of this object.
        #[arg(long, value_name = "RECORD")]
        json: Option<String>,
        #[arg(long, value_enum)]
        fan_speed: Option<FanSpeed>,
        /// In tenths of °C.
        #[arg(long, allow_negative_numbers = true)]
        desired_room_temperature: Option<i16>,
        /// In tenths of °C.
        #[arg(long, allow_negative_numbers = true)]
        desired_dhw_temperature: Option<i16>,
        #[arg(long)]
        dhw_production_paused: Option<bool>,
        /// In minutes.
        #[arg(long)]
        dhw_production_pause_duration: Option<u16>,
        #[arg(long)]
        central_heating_paused: Option<bool>,
        /// In minutes.
        #[arg(long)]
        central_heating_pause_duration: Option<u16>,
        #[arg(long, value_enum)]
        ventilation_mode: Option<VentilationMode>,
        #[arg(long)]
        ventilation_on_pause: Option<bool>,
        /// In whole °C.
        #[arg(long, allow_negative_numbers = true)]
        setpoint_supply_temperature: Option<i16>,
        #[clap(flatten)]
        connection: connection::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not parse the JSON settings record")]
        ParseJson(#[source] serde_json::Error),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not send the settings")]
        Send(#[source] crate::Error),
    }

    impl Args {
        fn to_settings(&self) -> Result<Settings, Error> {
            let flags = Settings {
                fan_speed: self.fan_speed,
                desired_room_temperature: self.desired_room_temperature,
                desired_dhw_temperature: self.desired_dhw_temperature,
                dhw_production_paused: self.dhw_production_paused,
                dhw_production_pause_duration: self.dhw_production_pause_duration,
                central_heating_paused: self.central_heating_paused,
                central_heating_pause_duration: self.central_heating_pause_duration,
                ventilation_mode: self.ventilation_mode.map(|m| m as u16),
                ventilation_on_pause: self.ventilation_on_pause,
                setpoint_supply_temperature: self.setpoint_supply_temperature,
            };
            let record = match &self.json {
                None => Settings::default(),
                Some(json) => serde_json::from_str(json).map_err(Error::ParseJson)?,
            };
            Ok(flags.or(record))
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let settings = args.to_settings()?;
        if settings.is_empty() {
            info!(message = "no settings to change");
        }
        let transport = TcpTransport::new(&args.connection);
        super::runtime()
            .map_err(Error::Runtime)?
            .block_on(send_settings(&transport, &settings))
            .map_err(Error::Send)
    }

}
