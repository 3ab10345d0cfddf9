use crate::prelude::*;
use crate::hoymiles::fields::{
    CalcFunction as Calc, Channel, ChannelKind, FieldDescriptor, FieldId::*, UnitId::*, CH0, CH1,
    CH2, CH3, CH4, CH5, CH6,
};
use crate::hoymiles::fields::{FieldId, UnitId};

use serde::{Deserialize, Serialize};

/// Hardware models with a known statistics layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Hm1Ch,
    Hm2Ch,
    Hm4Ch,
    Hms2Ch,
    Hmt6Ch,
}

pub const MODELS: [Model; 5] = [
    Model::Hm1Ch,
    Model::Hm2Ch,
    Model::Hm4Ch,
    Model::Hms2Ch,
    Model::Hmt6Ch,
];

impl Model {
    /// Picks the model from the type prefix in the upper 16 bits of a serial.
    ///
    /// HM serials carry the channel layout in the middle byte of the prefix
    /// (`x12x`, `x14x`, `x16x`); older units use `1021`, `1042` and `1062`.
    /// HMS and HMT prefixes are matched first since `1144` also fits `x14x`.
    pub fn from_serial(serial: Serial) -> Option<Self> {
        let prefix = serial.type_prefix();
        match prefix {
            0x1144 => return Some(Model::Hms2Ch),
            0x1382 => return Some(Model::Hmt6Ch),
            // HMS-1CH and HMS-4CH, no field table
            0x1124 | 0x1164 => return None,
            0x1021 => return Some(Model::Hm1Ch),
            0x1042 => return Some(Model::Hm2Ch),
            0x1062 => return Some(Model::Hm4Ch),
            _ => {}
        }

        match (prefix >> 4) & 0xff {
            0x12 => Some(Model::Hm1Ch),
            0x14 => Some(Model::Hm2Ch),
            0x16 => Some(Model::Hm4Ch),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Model::Hm1Ch => "HM-300/350/400-1T",
            Model::Hm2Ch => "HM-600/700/800-2T",
            Model::Hm4Ch => "HM-1000/1200/1500-4T",
            Model::Hms2Ch => "HMS-600/700/800/900/1000-2T",
            Model::Hmt6Ch => "HMT-1600/1800/2250-6T",
        }
    }

    pub fn descriptors(&self) -> &'static [FieldDescriptor] {
        match self {
            Model::Hm1Ch => HM_1CH,
            Model::Hm2Ch => HM_2CH,
            Model::Hm4Ch => HM_4CH,
            Model::Hms2Ch => HMS_2CH,
            Model::Hmt6Ch => HMT_6CH,
        }
    }

    pub fn dc_channel_count(&self) -> u8 {
        match self {
            Model::Hm1Ch => 1,
            Model::Hm2Ch | Model::Hms2Ch => 2,
            Model::Hm4Ch => 4,
            Model::Hmt6Ch => 6,
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[allow(clippy::too_many_arguments)]
const fn dc(
    channel: Channel,
    field: FieldId,
    unit: UnitId,
    offset: usize,
    length: usize,
    divisor: u16,
    digits: u8,
) -> FieldDescriptor {
    FieldDescriptor::raw(
        ChannelKind::Dc,
        channel,
        field,
        unit,
        offset,
        length,
        divisor,
        false,
        digits,
    )
}

#[allow(clippy::too_many_arguments)]
const fn ac(
    field: FieldId,
    unit: UnitId,
    offset: usize,
    length: usize,
    divisor: u16,
    signed: bool,
    digits: u8,
) -> FieldDescriptor {
    FieldDescriptor::raw(
        ChannelKind::Ac,
        CH0,
        field,
        unit,
        offset,
        length,
        divisor,
        signed,
        digits,
    )
}

const fn inv(
    field: FieldId,
    unit: UnitId,
    offset: usize,
    length: usize,
    divisor: u16,
    signed: bool,
    digits: u8,
) -> FieldDescriptor {
    FieldDescriptor::raw(
        ChannelKind::Inverter,
        CH0,
        field,
        unit,
        offset,
        length,
        divisor,
        signed,
        digits,
    )
}

const fn irradiation(channel: Channel) -> FieldDescriptor {
    FieldDescriptor::calculated(
        ChannelKind::Dc,
        channel,
        Irradiation,
        Percent,
        Calc::ChannelIrradiation,
        channel,
        3,
    )
}

const fn shared_udc(channel: Channel, source: Channel) -> FieldDescriptor {
    FieldDescriptor::calculated(
        ChannelKind::Dc,
        channel,
        Udc,
        Volt,
        Calc::ChannelDcVoltage,
        source,
        1,
    )
}

const fn total(field: FieldId, unit: UnitId, function: Calc, digits: u8) -> FieldDescriptor {
    FieldDescriptor::calculated(ChannelKind::Inverter, CH0, field, unit, function, CH0, digits)
}

const TOTAL_YIELD_DAY: FieldDescriptor = total(YieldDay, WattHour, Calc::SumYieldDay, 0);
const TOTAL_YIELD: FieldDescriptor = total(YieldTotal, KiloWattHour, Calc::SumYieldTotal, 3);
const TOTAL_PDC: FieldDescriptor = total(Pdc, Watt, Calc::SumDcPower, 1);
const TOTAL_EFFICIENCY: FieldDescriptor = total(Efficiency, Percent, Calc::AcDcEfficiency, 3);

// HM-300/350/400 {{{
static HM_1CH: &[FieldDescriptor] = &[
    dc(CH1, Udc, Volt, 2, 2, 10, 1),
    dc(CH1, Idc, Ampere, 4, 2, 100, 2),
    dc(CH1, Pdc, Watt, 6, 2, 10, 1),
    dc(CH1, YieldDay, WattHour, 12, 2, 1, 0),
    dc(CH1, YieldTotal, KiloWattHour, 8, 4, 1000, 3),
    irradiation(CH1),
    ac(Uac, Volt, 14, 2, 10, false, 1),
    ac(Iac, Ampere, 22, 2, 100, false, 2),
    ac(Pac, Watt, 18, 2, 10, false, 1),
    ac(ReactivePower, Var, 20, 2, 10, false, 1),
    ac(Frequency, Hertz, 16, 2, 100, false, 2),
    ac(PowerFactor, Unitless, 24, 2, 1000, false, 3),
    inv(Temperature, Celsius, 26, 2, 10, true, 1),
    inv(EventLogCount, Unitless, 28, 2, 1, false, 0),
    TOTAL_YIELD_DAY,
    TOTAL_YIELD,
    TOTAL_PDC,
    TOTAL_EFFICIENCY,
]; // }}}

// HM-600/700/800 {{{
static HM_2CH: &[FieldDescriptor] = &[
    dc(CH1, Udc, Volt, 2, 2, 10, 1),
    dc(CH1, Idc, Ampere, 4, 2, 100, 2),
    dc(CH1, Pdc, Watt, 6, 2, 10, 1),
    dc(CH1, YieldDay, WattHour, 22, 2, 1, 0),
    dc(CH1, YieldTotal, KiloWattHour, 14, 4, 1000, 3),
    irradiation(CH1),
    dc(CH2, Udc, Volt, 8, 2, 10, 1),
    dc(CH2, Idc, Ampere, 10, 2, 100, 2),
    dc(CH2, Pdc, Watt, 12, 2, 10, 1),
    dc(CH2, YieldDay, WattHour, 24, 2, 1, 0),
    dc(CH2, YieldTotal, KiloWattHour, 18, 4, 1000, 3),
    irradiation(CH2),
    ac(Uac, Volt, 26, 2, 10, false, 1),
    ac(Iac, Ampere, 34, 2, 100, false, 2),
    ac(Pac, Watt, 30, 2, 10, false, 1),
    ac(ReactivePower, Var, 32, 2, 10, false, 1),
    ac(Frequency, Hertz, 28, 2, 100, false, 2),
    ac(PowerFactor, Unitless, 36, 2, 1000, false, 3),
    inv(Temperature, Celsius, 38, 2, 10, true, 1),
    inv(EventLogCount, Unitless, 40, 2, 1, false, 0),
    TOTAL_YIELD_DAY,
    TOTAL_YIELD,
    TOTAL_PDC,
    TOTAL_EFFICIENCY,
]; // }}}

// HM-1000/1200/1500 {{{
// inputs 1+2 and 3+4 share one MPPT each, so only one voltage per pair is sent
static HM_4CH: &[FieldDescriptor] = &[
    dc(CH1, Udc, Volt, 2, 2, 10, 1),
    dc(CH1, Idc, Ampere, 4, 2, 100, 2),
    dc(CH1, Pdc, Watt, 8, 2, 10, 1),
    dc(CH1, YieldDay, WattHour, 20, 2, 1, 0),
    dc(CH1, YieldTotal, KiloWattHour, 12, 4, 1000, 3),
    irradiation(CH1),
    shared_udc(CH2, CH1),
    dc(CH2, Idc, Ampere, 6, 2, 100, 2),
    dc(CH2, Pdc, Watt, 10, 2, 10, 1),
    dc(CH2, YieldDay, WattHour, 22, 2, 1, 0),
    dc(CH2, YieldTotal, KiloWattHour, 16, 4, 1000, 3),
    irradiation(CH2),
    dc(CH3, Udc, Volt, 24, 2, 10, 1),
    dc(CH3, Idc, Ampere, 26, 2, 100, 2),
    dc(CH3, Pdc, Watt, 30, 2, 10, 1),
    dc(CH3, YieldDay, WattHour, 42, 2, 1, 0),
    dc(CH3, YieldTotal, KiloWattHour, 34, 4, 1000, 3),
    irradiation(CH3),
    shared_udc(CH4, CH3),
    dc(CH4, Idc, Ampere, 28, 2, 100, 2),
    dc(CH4, Pdc, Watt, 32, 2, 10, 1),
    dc(CH4, YieldDay, WattHour, 44, 2, 1, 0),
    dc(CH4, YieldTotal, KiloWattHour, 38, 4, 1000, 3),
    irradiation(CH4),
    ac(Uac, Volt, 46, 2, 10, false, 1),
    ac(Iac, Ampere, 54, 2, 100, false, 2),
    ac(Pac, Watt, 50, 2, 10, false, 1),
    ac(ReactivePower, Var, 52, 2, 10, false, 1),
    ac(Frequency, Hertz, 48, 2, 100, false, 2),
    ac(PowerFactor, Unitless, 56, 2, 1000, false, 3),
    inv(Temperature, Celsius, 58, 2, 10, true, 1),
    inv(EventLogCount, Unitless, 60, 2, 1, false, 0),
    TOTAL_YIELD_DAY,
    TOTAL_YIELD,
    TOTAL_PDC,
    TOTAL_EFFICIENCY,
]; // }}}

// HMS-600/700/800/900/1000 {{{
static HMS_2CH: &[FieldDescriptor] = &[
    dc(CH1, Udc, Volt, 2, 2, 10, 1),
    dc(CH1, Idc, Ampere, 6, 2, 100, 2),
    dc(CH1, Pdc, Watt, 10, 2, 10, 1),
    dc(CH1, YieldDay, WattHour, 22, 2, 1, 0),
    dc(CH1, YieldTotal, KiloWattHour, 14, 4, 1000, 3),
    irradiation(CH1),
    dc(CH2, Udc, Volt, 4, 2, 10, 1),
    dc(CH2, Idc, Ampere, 8, 2, 100, 2),
    dc(CH2, Pdc, Watt, 12, 2, 10, 1),
    dc(CH2, YieldDay, WattHour, 24, 2, 1, 0),
    dc(CH2, YieldTotal, KiloWattHour, 18, 4, 1000, 3),
    irradiation(CH2),
    ac(Uac, Volt, 26, 2, 10, false, 1),
    ac(Iac, Ampere, 34, 2, 100, false, 2),
    ac(Pac, Watt, 30, 2, 10, false, 1),
    ac(ReactivePower, Var, 32, 2, 10, false, 1),
    ac(Frequency, Hertz, 28, 2, 100, false, 2),
    ac(PowerFactor, Unitless, 36, 2, 1000, false, 3),
    inv(Temperature, Celsius, 38, 2, 10, true, 1),
    inv(EventLogCount, Unitless, 40, 2, 1, false, 0),
    TOTAL_YIELD_DAY,
    TOTAL_YIELD,
    TOTAL_PDC,
    TOTAL_EFFICIENCY,
]; // }}}

// HMT-1600/1800/2250 {{{
static HMT_6CH: &[FieldDescriptor] = &[
    dc(CH1, Udc, Volt, 2, 2, 10, 1),
    dc(CH1, Idc, Ampere, 4, 2, 100, 2),
    dc(CH1, Pdc, Watt, 8, 2, 10, 1),
    dc(CH1, YieldTotal, KiloWattHour, 12, 4, 1000, 3),
    dc(CH1, YieldDay, WattHour, 20, 2, 1, 0),
    irradiation(CH1),
    shared_udc(CH2, CH1),
    dc(CH2, Idc, Ampere, 6, 2, 100, 2),
    dc(CH2, Pdc, Watt, 10, 2, 10, 1),
    dc(CH2, YieldTotal, KiloWattHour, 16, 4, 1000, 3),
    dc(CH2, YieldDay, WattHour, 22, 2, 1, 0),
    irradiation(CH2),
    dc(CH3, Udc, Volt, 24, 2, 10, 1),
    dc(CH3, Idc, Ampere, 26, 2, 100, 2),
    dc(CH3, Pdc, Watt, 30, 2, 10, 1),
    dc(CH3, YieldTotal, KiloWattHour, 34, 4, 1000, 3),
    dc(CH3, YieldDay, WattHour, 42, 2, 1, 0),
    irradiation(CH3),
    shared_udc(CH4, CH3),
    dc(CH4, Idc, Ampere, 28, 2, 100, 2),
    dc(CH4, Pdc, Watt, 32, 2, 10, 1),
    dc(CH4, YieldTotal, KiloWattHour, 38, 4, 1000, 3),
    dc(CH4, YieldDay, WattHour, 44, 2, 1, 0),
    irradiation(CH4),
    dc(CH5, Udc, Volt, 46, 2, 10, 1),
    dc(CH5, Idc, Ampere, 48, 2, 100, 2),
    dc(CH5, Pdc, Watt, 52, 2, 10, 1),
    dc(CH5, YieldTotal, KiloWattHour, 56, 4, 1000, 3),
    dc(CH5, YieldDay, WattHour, 64, 2, 1, 0),
    irradiation(CH5),
    shared_udc(CH6, CH5),
    dc(CH6, Idc, Ampere, 50, 2, 100, 2),
    dc(CH6, Pdc, Watt, 54, 2, 10, 1),
    dc(CH6, YieldTotal, KiloWattHour, 60, 4, 1000, 3),
    dc(CH6, YieldDay, WattHour, 66, 2, 1, 0),
    irradiation(CH6),
    ac(UacPh1N, Volt, 68, 2, 10, false, 1),
    ac(UacPh2N, Volt, 70, 2, 10, false, 1),
    ac(UacPh3N, Volt, 72, 2, 10, false, 1),
    ac(UacPh12, Volt, 74, 2, 10, false, 1),
    ac(UacPh23, Volt, 76, 2, 10, false, 1),
    ac(UacPh31, Volt, 78, 2, 10, false, 1),
    ac(Frequency, Hertz, 80, 2, 100, false, 2),
    ac(Pac, Watt, 82, 2, 10, false, 1),
    ac(ReactivePower, Var, 84, 2, 10, true, 1),
    ac(IacPh1, Ampere, 86, 2, 100, false, 2),
    ac(IacPh2, Ampere, 88, 2, 100, false, 2),
    ac(IacPh3, Ampere, 90, 2, 100, false, 2),
    ac(PowerFactor, Unitless, 92, 2, 1000, false, 3),
    inv(Temperature, Celsius, 94, 2, 10, true, 1),
    inv(EventLogCount, Unitless, 96, 2, 1, false, 0),
    TOTAL_YIELD_DAY,
    TOTAL_YIELD,
    TOTAL_PDC,
    TOTAL_EFFICIENCY,
]; // }}}
