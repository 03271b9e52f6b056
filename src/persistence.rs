/*!
 # Persistence codec

 Fixed binary layout for keeping schedules and overrides on
 non-volatile storage (EEPROM, flash, a file):

 ```text
 offset 0   0xD3, 0x23          magic
 offset 2   version             currently 1
 offset 3   N                   schedule count (0..=10)
 offset 4   N x 39-byte record  id, day_mask, start_hour, start_minute,
                                end_hour, end_minute, enabled (0/1),
                                name[32] NUL padded (31 visible bytes max)
 then       18 bytes            vacation: enabled, start[8], end[8],
                                run_pump_exercise
 then       14 bytes            pump: enabled, day_of_month, hour, minute,
                                duration_seconds (u16 LE), last_run[8]
 ```

 A timestamp is 8 bytes: valid flag, year (u16 LE), month, day, hour,
 minute, second. The vacation and pump sections are optional on decode.
*/

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, error, info};

use crate::overrides::{PumpExercise, VacationMode};
use crate::schedule::{Schedule, ScheduleStore, MAX_NAME_LEN, MAX_SCHEDULES};
use crate::state::ScheduleState;
use crate::{Error, Result};

pub const MAGIC: [u8; 2] = [0xD3, 0x23];
pub const FORMAT_VERSION: u8 = 1;

pub const HEADER_LEN: usize = 4;
pub const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;
pub const RECORD_LEN: usize = 7 + NAME_FIELD_LEN;
pub const TIMESTAMP_LEN: usize = 8;
pub const VACATION_LEN: usize = 2 + 2 * TIMESTAMP_LEN;
pub const PUMP_LEN: usize = 6 + TIMESTAMP_LEN;

/// Result of decoding a blob; override sections are `None` when the
/// blob ends before them.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub schedules: ScheduleStore,
    pub vacation: Option<VacationMode>,
    pub pump: Option<PumpExercise>,
}

/// Exact number of bytes [`encode`] produces for `state`
pub fn encoded_len(state: &ScheduleState) -> usize {
    HEADER_LEN + state.schedules.len() * RECORD_LEN + VACATION_LEN + PUMP_LEN
}

/// Serializes `state` into a new buffer
pub fn encode(state: &ScheduleState) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(state));

    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.push(state.schedules.len() as u8);

    for schedule in state.schedules.list() {
        out.extend_from_slice(&[
            schedule.id,
            schedule.day_mask,
            schedule.start_hour,
            schedule.start_minute,
            schedule.end_hour,
            schedule.end_minute,
            schedule.enabled as u8,
        ]);

        let mut name = [0u8; NAME_FIELD_LEN];
        let truncated = truncate_name(&schedule.name);
        name[..truncated.len()].copy_from_slice(truncated.as_bytes());
        out.extend_from_slice(&name);
    }

    let vacation = &state.vacation;
    out.push(vacation.enabled as u8);
    put_timestamp(&mut out, Some(vacation.start));
    put_timestamp(&mut out, Some(vacation.end));
    out.push(vacation.run_pump_exercise as u8);

    let pump = &state.pump;
    out.extend_from_slice(&[pump.enabled as u8, pump.day_of_month, pump.hour, pump.minute]);
    out.extend_from_slice(&pump.duration_seconds.to_le_bytes());
    put_timestamp(&mut out, pump.last_run);

    debug!("Serialized {} schedules ({} bytes)", state.schedules.len(), out.len());
    out
}

/// Serializes `state` into `buf`, returning the number of bytes written
///
/// Fails without writing if `buf` is shorter than [`encoded_len`].
pub fn encode_into(state: &ScheduleState, buf: &mut [u8]) -> Result<usize> {
    let needed = encoded_len(state);
    if buf.len() < needed {
        error!("Insufficient buffer size: need {}, have {}", needed, buf.len());
        return Err(Error::BufferTooSmall {
            needed,
            actual: buf.len(),
        });
    }

    let bytes = encode(state);
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
}

/// Parses a persisted blob
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let mut reader = Reader::new(bytes);

    let header = reader.take(HEADER_LEN)?;
    if header[..2] != MAGIC {
        error!("Invalid magic number");
        return Err(Error::InvalidMagic(header[0], header[1]));
    }

    let version = header[2];
    if version != FORMAT_VERSION {
        error!("Unsupported version: {}", version);
        return Err(Error::UnsupportedVersion(version));
    }

    let count = header[3];
    if count as usize > MAX_SCHEDULES {
        error!("Too many schedules: {}", count);
        return Err(Error::TooManySchedules(count));
    }

    let mut schedules = ScheduleStore::new();
    for _ in 0..count {
        let schedule = read_schedule(reader.take(RECORD_LEN)?)?;
        let id = schedule.id;
        schedules.add(schedule).map_err(|e| match e {
            Error::DuplicateId(_) => Error::CorruptRecord(format!("duplicate schedule id {id}")),
            other => other,
        })?;
    }

    let vacation = match reader.take_optional(VACATION_LEN) {
        Some(section) => Some(read_vacation(section)?),
        None => None,
    };

    // The pump section only exists after a complete vacation section
    let pump = match vacation.and_then(|_| reader.take_optional(PUMP_LEN)) {
        Some(section) => Some(read_pump(section)?),
        None => None,
    };

    info!("Deserialized {} schedules from buffer", count);
    Ok(Decoded {
        schedules,
        vacation,
        pump,
    })
}

/// Longest prefix of `name` that fits the name field, cut on a char boundary
fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

fn read_schedule(record: &[u8]) -> Result<Schedule> {
    let [id, day_mask, start_hour, start_minute, end_hour, end_minute, enabled] =
        [record[0], record[1], record[2], record[3], record[4], record[5], record[6]];

    if id == 0 {
        return Err(Error::CorruptRecord("schedule id 0".into()));
    }
    if day_mask > 0x7F {
        return Err(Error::CorruptRecord(format!(
            "schedule {id}: day mask {day_mask:#04x}"
        )));
    }
    if start_hour > 23 || end_hour > 23 || start_minute > 59 || end_minute > 59 {
        return Err(Error::CorruptRecord(format!(
            "schedule {id}: time {start_hour}:{start_minute}-{end_hour}:{end_minute}"
        )));
    }

    // The last byte of the field is always treated as a terminator
    let name_field = &record[7..7 + MAX_NAME_LEN];
    let name_len = name_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(MAX_NAME_LEN);
    let name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

    Ok(Schedule {
        id,
        day_mask,
        start_hour,
        start_minute,
        end_hour,
        end_minute,
        enabled: enabled != 0,
        name,
    })
}

fn read_vacation(section: &[u8]) -> Result<VacationMode> {
    Ok(VacationMode {
        enabled: section[0] != 0,
        start: read_timestamp(&section[1..9])?.unwrap_or_default(),
        end: read_timestamp(&section[9..17])?.unwrap_or_default(),
        run_pump_exercise: section[17] != 0,
    })
}

fn read_pump(section: &[u8]) -> Result<PumpExercise> {
    let [day_of_month, hour, minute] = [section[1], section[2], section[3]];
    if !(1..=31).contains(&day_of_month) || hour > 23 || minute > 59 {
        return Err(Error::CorruptRecord(format!(
            "pump exercise: day {day_of_month} at {hour}:{minute}"
        )));
    }

    Ok(PumpExercise {
        enabled: section[0] != 0,
        day_of_month,
        hour,
        minute,
        duration_seconds: u16::from_le_bytes([section[4], section[5]]),
        last_run: read_timestamp(&section[6..14])?,
    })
}

fn put_timestamp(out: &mut Vec<u8>, timestamp: Option<NaiveDateTime>) {
    match timestamp {
        Some(t) => {
            let year = u16::try_from(t.year()).unwrap_or(0);
            out.push(1);
            out.extend_from_slice(&year.to_le_bytes());
            out.extend_from_slice(&[
                t.month() as u8,
                t.day() as u8,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
            ]);
        }
        None => out.extend_from_slice(&[0; TIMESTAMP_LEN]),
    }
}

fn read_timestamp(field: &[u8]) -> Result<Option<NaiveDateTime>> {
    match field[0] {
        0 => Ok(None),
        1 => {
            let year = u16::from_le_bytes([field[1], field[2]]) as i32;
            NaiveDate::from_ymd_opt(year, field[3] as u32, field[4] as u32)
                .and_then(|d| d.and_hms_opt(field[5] as u32, field[6] as u32, field[7] as u32))
                .map(Some)
                .ok_or_else(|| Error::CorruptRecord(format!("timestamp {:02x?}", field)))
        }
        flag => Err(Error::CorruptRecord(format!("timestamp flag {flag}"))),
    }
}

/// Bounds-checked forward reader over a byte slice
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take_optional(len).ok_or(Error::BufferTooSmall {
            needed: self.offset + len,
            actual: self.bytes.len(),
        })
    }

    fn take_optional(&mut self, len: usize) -> Option<&'a [u8]> {
        let section = self.bytes.get(self.offset..self.offset + len)?;
        self.offset += len;
        Some(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::days::WEEK_DAYS;

    fn at(month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn sample_state() -> ScheduleState {
        let mut state = ScheduleState::new();
        state
            .schedules
            .add(Schedule::new("Morning Shower", WEEK_DAYS.week_days, (6, 0), (7, 30)))
            .unwrap();
        let mut late = Schedule::new("Late Bath", WEEK_DAYS.weekend_days, (23, 0), (1, 0));
        late.enabled = false;
        state.schedules.add(late).unwrap();

        state.vacation = VacationMode::new(at(7, 1, 0, 0), at(7, 14, 23, 59), true);
        state.pump = PumpExercise::new(15, 3, 30, 600);
        state.pump.last_run = Some(at(6, 15, 3, 30));
        state
    }

    #[test]
    fn test_round_trip() {
        let state = sample_state();
        let bytes = encode(&state);
        assert_eq!(bytes.len(), encoded_len(&state));
        assert_eq!(&bytes[..4], &[0xD3, 0x23, 1, 2]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.schedules, state.schedules);
        assert_eq!(decoded.vacation, Some(state.vacation));
        assert_eq!(decoded.pump, Some(state.pump));
    }

    #[test]
    fn test_record_layout() {
        let state = sample_state();
        let bytes = encode(&state);
        let record = &bytes[HEADER_LEN..HEADER_LEN + RECORD_LEN];
        assert_eq!(&record[..7], &[1, 0x3E, 6, 0, 7, 30, 1]);
        assert_eq!(&record[7..21], b"Morning Shower");
        assert!(record[21..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_long_names_are_truncated() {
        let mut state = ScheduleState::new();
        let long = "A".repeat(40);
        state
            .schedules
            .add(Schedule::new(long, WEEK_DAYS.all, (1, 0), (2, 0)))
            .unwrap();

        let decoded = decode(&encode(&state)).unwrap();
        assert_eq!(decoded.schedules.list()[0].name, "A".repeat(31));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 30 ASCII bytes followed by a two-byte character
        let name = format!("{}é", "b".repeat(30));
        assert_eq!(truncate_name(&name), "b".repeat(30));
        assert_eq!(truncate_name("short"), "short");
    }

    #[test]
    fn test_unterminated_name_is_cut_at_31_bytes() {
        let mut bytes = encode(&sample_state());
        let name_start = HEADER_LEN + 7;
        bytes[name_start..name_start + NAME_FIELD_LEN].fill(b'x');

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.schedules.list()[0].name, "x".repeat(31));
    }

    #[test]
    fn test_encode_into_checks_buffer_size() {
        let state = sample_state();
        let needed = encoded_len(&state);

        let mut small = vec![0u8; needed - 1];
        assert!(matches!(
            encode_into(&state, &mut small),
            Err(Error::BufferTooSmall { .. })
        ));
        assert!(small.iter().all(|&b| b == 0));

        let mut exact = vec![0u8; needed + 8];
        assert_eq!(encode_into(&state, &mut exact).unwrap(), needed);
        assert_eq!(&exact[..needed], encode(&state).as_slice());
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(decode(&[0xD3]), Err(Error::BufferTooSmall { .. })));
        assert!(matches!(
            decode(&[0xAA, 0x23, 1, 0]),
            Err(Error::InvalidMagic(0xAA, 0x23))
        ));
        assert!(matches!(
            decode(&[0xD3, 0x23, 2, 0]),
            Err(Error::UnsupportedVersion(2))
        ));
        assert!(matches!(
            decode(&[0xD3, 0x23, 1, 11]),
            Err(Error::TooManySchedules(11))
        ));
    }

    #[test]
    fn test_truncated_records_fail() {
        let bytes = encode(&sample_state());
        let cut = HEADER_LEN + RECORD_LEN + 10;
        assert!(matches!(decode(&bytes[..cut]), Err(Error::BufferTooSmall { .. })));
    }

    #[test]
    fn test_override_sections_are_optional() {
        let bytes = encode(&sample_state());

        let schedules_only = HEADER_LEN + 2 * RECORD_LEN;
        let decoded = decode(&bytes[..schedules_only]).unwrap();
        assert_eq!(decoded.schedules.len(), 2);
        assert!(decoded.vacation.is_none());
        assert!(decoded.pump.is_none());

        let with_vacation = schedules_only + VACATION_LEN;
        let decoded = decode(&bytes[..with_vacation + 3]).unwrap();
        assert!(decoded.vacation.is_some());
        assert!(decoded.pump.is_none());
    }

    #[test]
    fn test_corrupt_records_are_rejected() {
        let good = encode(&sample_state());

        let mut bad_hour = good.clone();
        bad_hour[HEADER_LEN + 2] = 24;
        assert!(matches!(decode(&bad_hour), Err(Error::CorruptRecord(_))));

        let mut bad_mask = good.clone();
        bad_mask[HEADER_LEN + 1] = 0x80;
        assert!(matches!(decode(&bad_mask), Err(Error::CorruptRecord(_))));

        let mut duplicate = good.clone();
        duplicate[HEADER_LEN + RECORD_LEN] = 1;
        assert!(matches!(decode(&duplicate), Err(Error::CorruptRecord(_))));

        let mut bad_timestamp = good.clone();
        let month = HEADER_LEN + 2 * RECORD_LEN + 1 + 3;
        bad_timestamp[month] = 13;
        assert!(matches!(decode(&bad_timestamp), Err(Error::CorruptRecord(_))));

        let pump = HEADER_LEN + 2 * RECORD_LEN + VACATION_LEN;
        for (offset, value) in [(1, 0), (1, 32), (2, 24), (3, 60)] {
            let mut bad_pump = good.clone();
            bad_pump[pump + offset] = value;
            assert!(
                matches!(decode(&bad_pump), Err(Error::CorruptRecord(_))),
                "pump byte {offset} = {value} accepted"
            );
        }
        // Day 31 is a valid slot
        let mut last_day = good;
        last_day[pump + 1] = 31;
        assert_eq!(decode(&last_day).unwrap().pump.unwrap().day_of_month, 31);
    }

    #[test]
    fn test_empty_store_round_trip() {
        let state = ScheduleState::new();
        let bytes = encode(&state);
        assert_eq!(bytes.len(), HEADER_LEN + VACATION_LEN + PUMP_LEN);

        let decoded = decode(&bytes).unwrap();
        assert!(decoded.schedules.is_empty());
        assert_eq!(decoded.pump, Some(PumpExercise::default()));
    }
}
