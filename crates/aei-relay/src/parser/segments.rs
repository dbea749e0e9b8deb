//! Typed AEI segments
//!
//! One struct per segment kind. Each `parse` takes the already-split fields
//! (segment id included at index 0) and the 1-based line number used in errors.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::MalformedInputError;

pub const TRAIN_HEADER_FIELDS: usize = 29;
pub const RAILCAR_FIELDS: usize = 15;
pub const END_OF_TRAIN_FIELDS: usize = 8;
pub const TRAILER_FIELDS: usize = 2;

/// `AEM` train header, one per file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainHeader {
    pub aar_billing_code: String,
    pub site_id: String,
    pub event_start_date: NaiveDate,
    pub event_start_time: NaiveTime,
    pub event_stop_time: NaiveTime,
    /// Hours from UTC; the wire value `060` means 6.0
    pub timezone: f64,
    pub daylight_saving: String,
    pub data_format_version: u16,
    pub train_sequence_number: String,
    pub locomotive_conversion_status: String,
    pub railcar_conversion_status: String,
    pub travel_direction: String,
    pub switch_direction: u8,
    pub units_measure: String,
    pub max_speed: u16,
    pub min_speed: u16,
    pub avg_speed: u16,
    pub movement_status: String,
    pub termination_state: String,
    pub transmission_type: String,
    pub adjacent_track_occupied: String,
    pub train_length: u32,
    pub equipment_status_code: String,
    pub locomotive_count: u16,
    pub locomotives_tagged: u16,
    pub railcar_count: u16,
    pub railcars_tagged: u16,
    pub total_axle_count: u32,
}

impl TrainHeader {
    pub fn parse(fields: &[&str], line: usize) -> Result<Self, MalformedInputError> {
        expect_fields("AEM", fields, TRAIN_HEADER_FIELDS, line)?;
        let f = Fields { fields, line };

        Ok(Self {
            aar_billing_code: f.text(1),
            site_id: f.text(2),
            event_start_date: f.date(3, "event_start_date")?,
            event_start_time: f.time(4, "event_start_time")?,
            event_stop_time: f.time(5, "event_stop_time")?,
            timezone: f.number::<i32>(6, "timezone")? as f64 / 10.0,
            daylight_saving: f.text(7),
            data_format_version: f.number(8, "data_format_version")?,
            train_sequence_number: f.text(9),
            locomotive_conversion_status: f.text(10),
            railcar_conversion_status: f.text(11),
            travel_direction: f.text(12),
            // Readers that do not report a switch direction leave a letter here
            switch_direction: f.number(13, "switch_direction").unwrap_or(0),
            units_measure: f.text(14),
            max_speed: f.number(15, "max_speed")?,
            min_speed: f.number(16, "min_speed")?,
            avg_speed: f.number(17, "avg_speed")?,
            movement_status: f.text(18),
            termination_state: f.text(19),
            transmission_type: f.text(20),
            adjacent_track_occupied: f.text(21),
            train_length: f.number(22, "train_length")?,
            equipment_status_code: f.text(23),
            locomotive_count: f.number(24, "locomotive_count")?,
            locomotives_tagged: f.number(25, "locomotives_tagged")?,
            railcar_count: f.number(26, "railcar_count")?,
            railcars_tagged: f.number(27, "railcars_tagged")?,
            total_axle_count: f.number(28, "total_axle_count")?,
        })
    }

    /// Local timestamp at which the train started passing the reader
    pub fn started_at(&self) -> NaiveDateTime {
        self.event_start_date.and_time(self.event_start_time)
    }
}

/// `RRE` railcar row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Railcar {
    pub sequence_number: u16,
    pub equipment_group_code: String,
    pub owner_code: String,
    pub owner_equipment_number: String,
    pub orientation: String,
    pub reserved: Option<String>,
    pub axle_conversion_code: String,
    pub tag_status: String,
    pub tag_detail_status: String,
    pub hand_shakes_antenna0: u16,
    pub hand_shakes_antenna1: u16,
    pub speed_of_vehicle: u16,
    pub axle_count: u16,
    pub platform_count: u16,
}

impl Railcar {
    pub fn parse(fields: &[&str], line: usize) -> Result<Self, MalformedInputError> {
        expect_fields("RRE", fields, RAILCAR_FIELDS, line)?;
        let f = Fields { fields, line };

        Ok(Self {
            sequence_number: f.number(1, "sequence_number")?,
            equipment_group_code: f.text(2),
            owner_code: f.text(3),
            owner_equipment_number: f.text(4),
            orientation: f.text(5),
            reserved: f.optional(6),
            axle_conversion_code: f.text(7),
            tag_status: f.text(8),
            tag_detail_status: f.text(9),
            hand_shakes_antenna0: f.number(10, "hand_shakes_antenna0")?,
            hand_shakes_antenna1: f.number(11, "hand_shakes_antenna1")?,
            speed_of_vehicle: f.number(12, "speed_of_vehicle")?,
            axle_count: f.number(13, "axle_count")?,
            platform_count: f.number(14, "platform_count")?,
        })
    }
}

/// `EOT` end-of-train device row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndOfTrain {
    pub sequence_number: u16,
    pub equipment_group_code: String,
    pub owner_code: String,
    pub owner_equipment_number: String,
    pub hand_shakes_antenna0: u16,
    pub hand_shakes_antenna1: u16,
    pub tag_detail_status: String,
}

impl EndOfTrain {
    pub fn parse(fields: &[&str], line: usize) -> Result<Self, MalformedInputError> {
        expect_fields("EOT", fields, END_OF_TRAIN_FIELDS, line)?;
        let f = Fields { fields, line };

        Ok(Self {
            sequence_number: f.number(1, "sequence_number")?,
            equipment_group_code: f.text(2),
            owner_code: f.text(3),
            owner_equipment_number: f.text(4),
            hand_shakes_antenna0: f.number(5, "hand_shakes_antenna0")?,
            hand_shakes_antenna1: f.number(6, "hand_shakes_antenna1")?,
            tag_detail_status: f.text(7),
        })
    }
}

/// `EOC` trailer closing the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trailer {
    pub total_byte_count: u64,
}

impl Trailer {
    pub fn parse(fields: &[&str], line: usize) -> Result<Self, MalformedInputError> {
        if fields.len() != TRAILER_FIELDS {
            return Err(MalformedInputError::TruncatedTrailer { line });
        }
        let f = Fields { fields, line };

        Ok(Self {
            total_byte_count: f.number(1, "total_byte_count")?,
        })
    }
}

fn expect_fields(
    segment: &'static str,
    fields: &[&str],
    expected: usize,
    line: usize,
) -> Result<(), MalformedInputError> {
    if fields.len() != expected {
        return Err(MalformedInputError::FieldCount {
            line,
            segment,
            expected,
            found: fields.len(),
        });
    }
    Ok(())
}

/// Field accessor bound to one line; callers have already checked the count
struct Fields<'a> {
    fields: &'a [&'a str],
    line: usize,
}

impl<'a> Fields<'a> {
    fn raw(&self, idx: usize) -> &'a str {
        self.fields.get(idx).copied().unwrap_or_default()
    }

    fn text(&self, idx: usize) -> String {
        self.raw(idx).trim().to_string()
    }

    fn optional(&self, idx: usize) -> Option<String> {
        Some(self.text(idx)).filter(|s| !s.is_empty())
    }

    fn invalid(&self, idx: usize, field: &'static str) -> MalformedInputError {
        MalformedInputError::InvalidField {
            line: self.line,
            field,
            value: self.raw(idx).to_string(),
        }
    }

    fn number<T: std::str::FromStr>(
        &self,
        idx: usize,
        field: &'static str,
    ) -> Result<T, MalformedInputError> {
        self.raw(idx)
            .trim()
            .parse()
            .map_err(|_| self.invalid(idx, field))
    }

    /// `YYMMDD`, always in the 2000s
    fn date(&self, idx: usize, field: &'static str) -> Result<NaiveDate, MalformedInputError> {
        let raw = self.raw(idx);
        if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.invalid(idx, field));
        }
        NaiveDate::parse_from_str(&format!("20{}", raw), "%Y%m%d")
            .map_err(|_| self.invalid(idx, field))
    }

    /// `HHMM`
    fn time(&self, idx: usize, field: &'static str) -> Result<NaiveTime, MalformedInputError> {
        let raw = self.raw(idx);
        if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.invalid(idx, field));
        }
        NaiveTime::parse_from_str(raw, "%H%M").map_err(|_| self.invalid(idx, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AEM: &str =
        "AEM*IHTRR*IHT0001*210915*0646*0700*060*Y*411*0022*G*G*N*0*E*004*000*003*C*N*F*N*01666*H*01*01*025*025*0106";

    fn split(line: &str) -> Vec<&str> {
        line.split('*').collect()
    }

    #[test]
    fn test_train_header_conversions() {
        let header = TrainHeader::parse(&split(AEM), 1).unwrap();

        assert_eq!(header.site_id, "IHT0001");
        assert_eq!(header.event_start_date, NaiveDate::from_ymd_opt(2021, 9, 15).unwrap());
        assert_eq!(header.event_start_time, NaiveTime::from_hms_opt(6, 46, 0).unwrap());
        assert_eq!(header.event_stop_time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(header.timezone, 6.0);
        assert_eq!(header.data_format_version, 411);
        assert_eq!(header.train_sequence_number, "0022");
        assert_eq!(header.max_speed, 4);
        assert_eq!(header.train_length, 1666);
        assert_eq!(header.railcar_count, 25);
        assert_eq!(header.total_axle_count, 106);
        assert_eq!(header.started_at().to_string(), "2021-09-15 06:46:00");
    }

    #[test]
    fn test_train_header_bad_date() {
        let line = AEM.replace("210915", "211345");
        let err = TrainHeader::parse(&split(&line), 3).unwrap_err();
        assert!(matches!(
            err,
            MalformedInputError::InvalidField { line: 3, field: "event_start_date", .. }
        ));
    }

    #[test]
    fn test_switch_direction_letter_defaults_to_zero() {
        let mut fields = split(AEM);
        fields[13] = "X";
        let header = TrainHeader::parse(&fields, 1).unwrap();
        assert_eq!(header.switch_direction, 0);
    }

    #[test]
    fn test_railcar_trims_owner_and_blank_reserved() {
        let car = Railcar::parse(&split("RRE*001*D*UP  *0000003237*A* *S*G*A*99*99*002*05*01"), 2)
            .unwrap();

        assert_eq!(car.sequence_number, 1);
        assert_eq!(car.owner_code, "UP");
        assert_eq!(car.owner_equipment_number, "0000003237");
        assert_eq!(car.reserved, None);
        assert_eq!(car.hand_shakes_antenna0, 99);
        assert_eq!(car.speed_of_vehicle, 2);
        assert_eq!(car.axle_count, 5);
        assert_eq!(car.platform_count, 1);
    }

    #[test]
    fn test_railcar_wrong_field_count() {
        let err = Railcar::parse(&split("RRE*001*D*UP*0000003237"), 4).unwrap_err();
        assert!(matches!(
            err,
            MalformedInputError::FieldCount { line: 4, segment: "RRE", expected: 15, found: 5 }
        ));
    }

    #[test]
    fn test_end_of_train() {
        let eot = EndOfTrain::parse(&split("EOT*026*E*UPRQ*0000067046*99*00*K"), 5).unwrap();
        assert_eq!(eot.sequence_number, 26);
        assert_eq!(eot.owner_code, "UPRQ");
        assert_eq!(eot.hand_shakes_antenna1, 0);
        assert_eq!(eot.tag_detail_status, "K");
    }

    #[test]
    fn test_trailer() {
        assert_eq!(
            Trailer::parse(&split("EOC*0000001521"), 9).unwrap().total_byte_count,
            1521
        );
        assert!(matches!(
            Trailer::parse(&split("EOC"), 9),
            Err(MalformedInputError::TruncatedTrailer { line: 9 })
        ));
    }
}
