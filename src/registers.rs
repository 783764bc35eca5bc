/// Modbus unit identifier of a register's owner on the bus.
pub type SlaveId = u8;

/// The main ventilation controller.
pub const PRIMARY_CONTROLLER: SlaveId = 1;
/// The heat-pump/central heating module.
pub const HEATING_MODULE: SlaveId = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataType {
    scale: u8,
    signed: bool,
}

impl DataType {
    // Convenience aliases for nicely tabulated `for_each_register` macro definition below.
    pub const U16: Self = Self {
        scale: 1,
        signed: false,
    };
    pub const I16: Self = Self {
        scale: 1,
        signed: true,
    };
    pub const CEL: Self = Self {
        scale: 10,
        signed: true,
    };

    pub fn from_word(self, word: u16) -> Value {
        match self {
            Self::U16 => Value::U16(word),
            Self::I16 => Value::I16(word as i16),
            Self::CEL => Value::Celsius(word as i16),
            _ => unreachable!("malformed DataType"),
        }
    }

    /// Decode a big-endian register payload, which must be exactly one word long.
    pub fn from_bytes(self, bs: &[u8]) -> Option<Value> {
        let word: [u8; 2] = bs.try_into().ok()?;
        Some(self.from_word(u16::from_be_bytes(word)))
    }

    pub const fn is_signed(&self) -> bool {
        self.signed
    }

    pub const fn scale(&self) -> u8 {
        self.scale
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    U16(u16),
    I16(i16),
    /// This data type contains a value multiplied by 10.
    Celsius(i16),
}

impl Value {
    #[allow(non_snake_case)]
    const fn CEL(val: i16) -> Self {
        Self::Celsius(val)
    }

    /// The raw register word for this value.
    pub fn into_inner(self) -> u16 {
        match self {
            Value::U16(n) => n,
            Value::I16(n) | Value::Celsius(n) => n as u16,
        }
    }

    /// The unscaled numeric value, sign applied.
    pub fn to_i32(self) -> i32 {
        match self {
            Value::U16(n) => i32::from(n),
            Value::I16(n) | Value::Celsius(n) => i32::from(n),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::U16(n) => f.write_fmt(format_args!("{}", n)),
            Value::I16(n) => f.write_fmt(format_args!("{}", n)),
            Value::Celsius(n) => f.write_fmt(format_args!("{}", n as f32 / 10.0)),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::U16(n) => serializer.serialize_u16(n),
            Value::I16(n) => serializer.serialize_i16(n),
            Value::Celsius(n) => serializer.serialize_f32(n as f32 / 10.0),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Mode(u8);

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0 & Self::R.0 == 0 { "-" } else { "R" })?;
        f.write_str(if self.0 & Self::W.0 == 0 { "-" } else { "W" })?;
        Ok(())
    }
}

impl Mode {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);
    const R_: Self = Self::R;

    pub fn is_writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub const fn from_address(address: u16) -> Option<RegisterIndex> {
        // ADDRESSES is sorted, checked when DESCRIPTIONS is built.
        let (mut low, mut high) = (0, ADDRESSES.len());
        while low < high {
            let middle = low + (high - low) / 2;
            if ADDRESSES[middle] == address {
                return Some(Self(middle));
            } else if ADDRESSES[middle] < address {
                low = middle + 1;
            } else {
                high = middle;
            }
        }
        None
    }

    /// Like [`Self::from_address`], but fails compilation when used in a const context with an
    /// address the catalog does not know about.
    const fn expect_address(address: u16) -> RegisterIndex {
        match Self::from_address(address) {
            Some(index) => index,
            None => panic!("address is not in the register catalog"),
        }
    }

    pub fn from_name(name: &str) -> Option<RegisterIndex> {
        let index = NAMES.iter().position(|v| v.eq_ignore_ascii_case(name));
        index.map(Self)
    }

    /// Look up a register by its symbolic name or by its decimal address.
    pub fn parse(name_or_address: &str) -> Option<RegisterIndex> {
        match name_or_address.parse::<u16>() {
            Ok(address) => Self::from_address(address),
            Err(_) => Self::from_name(name_or_address),
        }
    }

    pub fn all() -> impl Iterator<Item = RegisterIndex> {
        (0..ADDRESSES.len()).map(Self)
    }

    pub const fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub const fn slave(&self) -> SlaveId {
        SLAVES[self.0]
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn mode(&self) -> Mode {
        MODES[self.0]
    }

    pub fn data_type(&self) -> DataType {
        DATA_TYPES[self.0]
    }

    pub fn minimum_value(&self) -> Option<Value> {
        MINIMUM_VALUES[self.0]
    }

    pub fn maximum_value(&self) -> Option<Value> {
        MAXIMUM_VALUES[self.0]
    }

    pub fn description(&self) -> &'static str {
        DESCRIPTIONS[self.0]
    }

    /// Whether `value` lies within the documented domain of this register.
    pub fn accepts(&self, value: i32) -> bool {
        let above_min = self.minimum_value().is_none_or(|min| value >= min.to_i32());
        let below_max = self.maximum_value().is_none_or(|max| value <= max.to_i32());
        above_min && below_max
    }
}

impl std::fmt::Display for RegisterIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{})", self.name(), self.address(), self.slave())
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            20100 @ 1: U16, RW, VENTILATION_PAUSE, min = 0, max = 1;
            20120 @ 1: U16, RW, VENTILATION_MODE, min = 0, max = 2;
            20148 @ 1: U16, RW, FAN_SPEED, min = 101, max = 104;
            20164 @ 1: U16, R_, AVERAGE_HUMIDITY, min = 0, max = 100;
            20260 @ 1: CEL, RW, DESIRED_ROOM_TEMPERATURE, min = 50, max = 400;
            20263 @ 1: U16, RW, MASTER_TEMPERATURE_SENSOR_SETTING, min = 0, max = 1;
            20280 @ 1: CEL, R_, TEXT_ROOM_TEMPERATURE;
            20282 @ 1: CEL, R_, OUTDOOR_TEMPERATURE;
            20286 @ 1: CEL, R_, T3_EXTRACT_AIR_TEMPERATURE;
            20440 @ 1: U16, RW, DHW_PAUSE, min = 0, max = 1;
            20441 @ 1: U16, RW, DHW_PAUSE_DURATION, min = 1, max = 180;
            20460 @ 1: CEL, RW, DHW_SET_POINT, min = 100, max = 600;
            20520 @ 1: CEL, R_, DHW_TANK_TOP_TEMPERATURE;
            20522 @ 1: CEL, R_, DHW_TANK_BOTTOM_TEMPERATURE;
            20600 @ 4: U16, RW, CENTRAL_HEATING_PAUSE, min = 0, max = 1;
            20601 @ 4: U16, RW, CENTRAL_HEATING_PAUSE_DURATION, min = 1, max = 180;
            20640 @ 4: I16, RW, SETPOINT_SUPPLY_TEMPERATURE_GEO, min = 5, max = 50;
            20653 @ 4: CEL, R_, T18_SUPPLY_FLOW_TEMPERATURE_GEO;
            20680 @ 4: I16, RW, SETPOINT_SUPPLY_TEMPERATURE_AIR9, min = 5, max = 50;
            20686 @ 4: CEL, R_, T18_SUPPLY_FLOW_TEMPERATURE_AIR9;
            21776 @ 1: U16, R_, ACTUAL_HUMIDITY, min = 0, max = 100;
            21839 @ 4: U16, R_, DEVICE_TYPE_GEO;
            21899 @ 4: U16, R_, DEVICE_TYPE_AIR9;
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($regnum: literal @ $slave: literal: $dt: ident, $mode: ident, $name: ident $(, min = $min: literal)? $(, max = $max: literal)?;)+) => {
        pub const ADDRESSES: &[u16] = &[$($regnum),*];
        pub const SLAVES: &[SlaveId] = &[$($slave),*];
        pub const NAMES: &[&str] = &[$(stringify!($name)),*];
        pub const MODES: &[Mode] = &[$(Mode::$mode),*];
        pub const DATA_TYPES: &[DataType] = &[$(DataType::$dt),*];
        pub const MINIMUM_VALUES: &[Option<Value>] = &[$(optional!($(Value::$dt($min))?)),*];
        pub const MAXIMUM_VALUES: &[Option<Value>] = &[$(optional!($(Value::$dt($max))?)),*];
        $(pub const $name: RegisterIndex = RegisterIndex::expect_address($regnum);)+
    };
}

for_each_register!(make_lists);

pub const DESCRIPTIONS: &[&str] = &const {
    let mut result = [""; ADDRESSES.len()];
    let mut index = 0;
    let mut previous_address = 0;
    while index < result.len() {
        let address = ADDRESSES[index];
        if address <= previous_address {
            panic!("ADDRESSES is not sorted (or has duplicate values)!");
        }
        if SLAVES[index] != PRIMARY_CONTROLLER && SLAVES[index] != HEATING_MODULE {
            panic!("register is owned by a slave that is not on the bus");
        }
        previous_address = address;
        result[index] = match address {
            20100 => "Ventilation stop (emergency). 0=Running, 1=Paused",
            20120 => "Ventilation mode. 0=Auto, 1=Cooling, 2=Heating",
            20148 => "Desired fan speed. 101=Low, 102=Normal, 103=High, 104=Very high",
            20164 => "Average humidity, %",
            20260 => "Desired room temperature",
            20263 => {
                "Source of the room temperature. 0=T3 extract air sensor, 1=Text room sensor"
            }
            20280 => "Room temperature from the Text sensor",
            20282 => "Outdoor temperature",
            20286 => "T3 extract air temperature",
            20440 => "Domestic hot water production pause. 0=Off, 1=Paused",
            20441 => "Duration of the domestic hot water pause, minutes",
            20460 => "Desired domestic hot water temperature",
            20520 => "T11 domestic hot water tank temperature, top",
            20522 => "T12 domestic hot water tank temperature, bottom",
            20600 => "Central heating pause. 0=Off, 1=Paused",
            20601 => "Duration of the central heating pause, minutes",
            20640 => "Supply temperature set point, °C (GEO units)",
            20653 => "T18 supply flow temperature (GEO units)",
            20680 => "Supply temperature set point, °C (AIR9 units)",
            20686 => "T18 supply flow temperature (AIR9 units)",
            21776 => "Actual humidity, %",
            21839 => "Device type identification. 8 on GEO units",
            21899 => "Device type identification. 9 on AIR9 units",
            _ => "",
        };
        index += 1;
    }
    result
};
