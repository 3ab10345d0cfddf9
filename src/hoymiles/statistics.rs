use crate::prelude::*;
use crate::hoymiles::fields::{
    CalcFunction, Channel, ChannelKind, FieldDescriptor, FieldId, FieldSource, CH0,
};
use crate::hoymiles::models::Model;

use serde::Serialize;

/// Size of the reassembled statistics payload.
pub const STATISTIC_PACKET_SIZE: usize = 7 * 16;

#[derive(Clone, Copy, Debug, PartialEq)]
struct FieldOffset {
    channel: Channel,
    field: FieldId,
    offset: f32,
}

/// One decoded field, as handed to display collaborators.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldReading {
    pub channel: Channel,
    pub field: FieldId,
    pub name: &'static str,
    pub unit: &'static str,
    pub digits: u8,
    pub value: f32,
}

/// Byte-field decoder and telemetry snapshot of one inverter.
///
/// Fragments of a statistics frame are copied into a fixed buffer as they
/// arrive; fields are decoded on demand from the buffer through the
/// descriptor table of the inverter's hardware model. A field is only
/// reported once all of its bytes (or, for calculated fields, all of its
/// dependencies) are present.
#[derive(Clone, Debug)]
pub struct Statistics {
    descriptors: &'static [FieldDescriptor],
    payload: [u8; STATISTIC_PACKET_SIZE],
    length: usize,
    channel_max_power: Vec<u16>,
    field_offsets: Vec<FieldOffset>,
    rx_failure_count: u32,
    last_update: Option<Instant>,
}

impl Statistics {
    pub fn for_model(model: Model) -> Self {
        Self::with_descriptors(model.descriptors())
    }

    /// Binds a descriptor table for the lifetime of this instance.
    pub fn with_descriptors(descriptors: &'static [FieldDescriptor]) -> Self {
        let channels = descriptors
            .iter()
            .map(|d| d.channel as usize)
            .max()
            .unwrap_or(0);

        Self {
            descriptors,
            payload: [0; STATISTIC_PACKET_SIZE],
            length: 0,
            channel_max_power: vec![0; channels + 1],
            field_offsets: Vec::new(),
            rx_failure_count: 0,
            last_update: None,
        }
    }

    pub fn descriptors(&self) -> &'static [FieldDescriptor] {
        self.descriptors
    }

    pub fn clear_buffer(&mut self) {
        self.payload = [0; STATISTIC_PACKET_SIZE];
        self.length = 0;
    }

    /// Copies a fragment into the buffer at `offset`. Anything beyond the
    /// buffer capacity is dropped.
    pub fn append_fragment(&mut self, offset: usize, fragment: &[u8]) {
        if offset >= STATISTIC_PACKET_SIZE {
            warn!(
                "statistics fragment at offset {} lies outside the {} byte buffer, ignored",
                offset, STATISTIC_PACKET_SIZE
            );
            return;
        }

        let end = offset.saturating_add(fragment.len());
        let clipped_end = end.min(STATISTIC_PACKET_SIZE);
        if clipped_end < end {
            warn!(
                "statistics fragment at offset {} with {} bytes exceeds the {} byte buffer, clipped",
                offset,
                fragment.len(),
                STATISTIC_PACKET_SIZE
            );
        }

        let count = clipped_end - offset;
        self.payload[offset..clipped_end].copy_from_slice(&fragment[..count]);
        self.length = self.length.max(clipped_end);
    }

    /// Number of buffered bytes counted from the start of the frame.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn descriptor(&self, channel: Channel, field: FieldId) -> Option<&'static FieldDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.channel == channel && d.field == field)
    }

    pub fn field_available(&self, channel: Channel, field: FieldId) -> bool {
        let Some(descriptor) = self.descriptor(channel, field) else {
            return false;
        };

        match descriptor.source {
            FieldSource::Raw { offset, length, .. } => {
                length > 0 && offset + length <= self.length
            }
            FieldSource::Calculated { function, argument } => self
                .dependencies(function, argument)
                .into_iter()
                .all(|(channel, field)| self.field_available(channel, field)),
        }
    }

    pub fn field_value(&self, channel: Channel, field: FieldId) -> Option<f32> {
        let descriptor = self.descriptor(channel, field)?;
        if !self.field_available(channel, field) {
            return None;
        }

        match descriptor.source {
            FieldSource::Raw {
                offset,
                length,
                divisor,
            } => self.raw_value(descriptor, offset, length, divisor),
            FieldSource::Calculated { function, argument } => {
                self.calculated_value(function, argument)
            }
        }
    }

    pub fn field_unit(&self, channel: Channel, field: FieldId) -> Option<&'static str> {
        self.descriptor(channel, field).map(|d| d.unit.symbol())
    }

    pub fn field_name(&self, channel: Channel, field: FieldId) -> Option<&'static str> {
        self.descriptor(channel, field).map(|d| d.field.name())
    }

    pub fn field_digits(&self, channel: Channel, field: FieldId) -> Option<u8> {
        self.descriptor(channel, field).map(|d| d.digits)
    }

    /// Value formatted with its number of digits and unit, e.g. `"231.4 V"`.
    pub fn field_display(&self, channel: Channel, field: FieldId) -> Option<String> {
        let descriptor = self.descriptor(channel, field)?;
        let value = self.field_value(channel, field)?;
        let digits = descriptor.digits as usize;
        let unit = descriptor.unit.symbol();

        if unit.is_empty() {
            Some(format!("{:.*}", digits, value))
        } else {
            Some(format!("{:.*} {}", digits, value, unit))
        }
    }

    /// All currently decodable fields of the table.
    pub fn readings(&self) -> Vec<FieldReading> {
        self.descriptors
            .iter()
            .filter_map(|d| {
                self.field_value(d.channel, d.field).map(|value| FieldReading {
                    channel: d.channel,
                    field: d.field,
                    name: d.field.name(),
                    unit: d.unit.symbol(),
                    digits: d.digits,
                    value,
                })
            })
            .collect()
    }

    /// Highest DC channel number in the table.
    pub fn channel_count(&self) -> u8 {
        self.descriptors
            .iter()
            .filter(|d| d.kind == ChannelKind::Dc)
            .map(|d| d.channel)
            .max()
            .unwrap_or(0)
    }

    pub fn channel_max_power(&self, channel: Channel) -> u16 {
        self.channel_max_power
            .get(channel as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_channel_max_power(&mut self, channel: Channel, power: u16) {
        match self.channel_max_power.get_mut(channel as usize) {
            Some(slot) => *slot = power,
            None => warn!("cannot set max power of unknown channel {}", channel),
        }
    }

    /// Adds a fixed calibration offset to a raw field.
    pub fn set_field_offset(&mut self, channel: Channel, field: FieldId, offset: f32) {
        match self
            .field_offsets
            .iter_mut()
            .find(|o| o.channel == channel && o.field == field)
        {
            Some(existing) => existing.offset = offset,
            None => self.field_offsets.push(FieldOffset {
                channel,
                field,
                offset,
            }),
        }
    }

    pub fn rx_failure_count(&self) -> u32 {
        self.rx_failure_count
    }

    pub fn increment_rx_failure_count(&mut self) {
        self.rx_failure_count = self.rx_failure_count.saturating_add(1);
    }

    pub fn reset_rx_failure_count(&mut self) {
        self.rx_failure_count = 0;
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn set_last_update(&mut self, when: Instant) {
        self.last_update = Some(when);
    }

    fn raw_value(
        &self,
        descriptor: &FieldDescriptor,
        offset: usize,
        length: usize,
        divisor: u16,
    ) -> Option<f32> {
        if length == 0 || length > 4 || divisor == 0 {
            return None;
        }

        let value = self.payload[offset..offset + length]
            .iter()
            .fold(0_u32, |acc, byte| (acc << 8) | u32::from(*byte));

        let value = if descriptor.signed {
            let shift = 32 - 8 * length as u32;
            (((value << shift) as i32) >> shift) as f32
        } else {
            value as f32
        };

        let mut result = value / f32::from(divisor);
        if self.length > 0 {
            if let Some(o) = self
                .field_offsets
                .iter()
                .find(|o| o.channel == descriptor.channel && o.field == descriptor.field)
            {
                result += o.offset;
            }
        }

        Some(result)
    }

    fn dc_channels_with(&self, field: FieldId) -> Vec<Channel> {
        (1..=self.channel_count())
            .filter(|ch| self.descriptor(*ch, field).is_some())
            .collect()
    }

    fn dependencies(&self, function: CalcFunction, argument: Channel) -> Vec<(Channel, FieldId)> {
        let over_dc = |field: FieldId| {
            self.dc_channels_with(field)
                .into_iter()
                .map(move |ch| (ch, field))
                .collect::<Vec<_>>()
        };

        match function {
            CalcFunction::SumYieldTotal => over_dc(FieldId::YieldTotal),
            CalcFunction::SumYieldDay => over_dc(FieldId::YieldDay),
            CalcFunction::SumDcPower => over_dc(FieldId::Pdc),
            CalcFunction::ChannelDcVoltage => vec![(argument, FieldId::Udc)],
            CalcFunction::AcDcEfficiency => {
                let mut deps = vec![(CH0, FieldId::Pac)];
                deps.extend(over_dc(FieldId::Pdc));
                deps
            }
            CalcFunction::ChannelIrradiation => vec![(argument, FieldId::Pdc)],
        }
    }

    fn sum_over_dc(&self, field: FieldId) -> Option<f32> {
        self.dc_channels_with(field)
            .into_iter()
            .map(|ch| self.field_value(ch, field))
            .sum()
    }

    fn calculated_value(&self, function: CalcFunction, argument: Channel) -> Option<f32> {
        match function {
            CalcFunction::SumYieldTotal => self.sum_over_dc(FieldId::YieldTotal),
            CalcFunction::SumYieldDay => self.sum_over_dc(FieldId::YieldDay),
            CalcFunction::SumDcPower => self.sum_over_dc(FieldId::Pdc),
            CalcFunction::ChannelDcVoltage => self.field_value(argument, FieldId::Udc),
            CalcFunction::AcDcEfficiency => {
                let ac_power = self.field_value(CH0, FieldId::Pac)?;
                let dc_power = self.sum_over_dc(FieldId::Pdc)?;
                if dc_power > 0.0 {
                    Some(ac_power / dc_power * 100.0)
                } else {
                    Some(0.0)
                }
            }
            CalcFunction::ChannelIrradiation => {
                let dc_power = self.field_value(argument, FieldId::Pdc)?;
                let max_power = self.channel_max_power(argument);
                if max_power > 0 {
                    Some(dc_power / f32::from(max_power) * 100.0)
                } else {
                    Some(0.0)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hoymiles::fields::{FieldDescriptor, UnitId, CH1};

    static SINGLE: &[FieldDescriptor] = &[FieldDescriptor::raw(
        ChannelKind::Dc,
        CH1,
        FieldId::Udc,
        UnitId::Volt,
        2,
        2,
        10,
        false,
        1,
    )];

    #[test]
    fn decodes_big_endian_with_divisor() {
        let mut stats = Statistics::with_descriptors(SINGLE);
        stats.append_fragment(0, &[0xAA, 0xBB, 0x00, 0x64]);

        assert_eq!(stats.field_value(CH1, FieldId::Udc), Some(10.0));
        assert_eq!(stats.field_display(CH1, FieldId::Udc).as_deref(), Some("10.0 V"));
    }

    #[test]
    fn partial_buffer_is_unavailable() {
        let mut stats = Statistics::with_descriptors(SINGLE);
        stats.append_fragment(0, &[0x00, 0x00, 0x01]);

        assert!(!stats.field_available(CH1, FieldId::Udc));
        assert_eq!(stats.field_value(CH1, FieldId::Udc), None);
    }

    #[test]
    fn fragment_past_capacity_is_clipped() {
        let mut stats = Statistics::with_descriptors(SINGLE);
        stats.append_fragment(STATISTIC_PACKET_SIZE - 2, &[1, 2, 3, 4]);
        assert_eq!(stats.length(), STATISTIC_PACKET_SIZE);

        stats.append_fragment(STATISTIC_PACKET_SIZE + 4, &[1, 2]);
        assert_eq!(stats.length(), STATISTIC_PACKET_SIZE);
    }
}
