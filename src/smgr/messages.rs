//! SMGR message tables
//!
//! Message ids, element-info schemas, and the thin typed builders/views on
//! top of the generic codec. All wire-layout knowledge lives in the static
//! tables here; nothing below hand-rolls bytes.

use crate::error::{Error, Result};
use crate::qmi;
use crate::qmi::codec::{decode_tlvs, encode_tlvs};
use crate::qmi::element::{ArrayKind, ElementInfo, ElementKind, LenWidth, TlvInfo, Value};

// Message ids of the SMGR service
pub const SNS_SMGR_ALL_SENSOR_INFO: u16 = 0x05;
pub const SNS_SMGR_SINGLE_SENSOR_INFO: u16 = 0x06;
pub const SNS_SMGR_BUFFERING: u16 = 0x21;
pub const SNS_SMGR_BUFFERING_IND: u16 = 0x22;

// Buffering request actions
pub const ACTION_ADD: u8 = 1;
pub const ACTION_DELETE: u8 = 2;

// Fixed item parameters; the firmware accepts these on every known target
pub const DECIMATION_RECENT_SAMPLE: u8 = 1;
pub const CALIBRATION_FULL: u8 = 2;

// Destination capacities. Counts beyond these are protocol errors.
pub const MAX_SENSORS: usize = 32;
pub const MAX_NAME_LEN: usize = 40;
pub const MAX_DATA_TYPES: usize = 8;
pub const MAX_REPORT_ITEMS: usize = 28;
pub const MAX_SAMPLES: usize = 100;

const RESULT_EI: &[ElementInfo] = &[
    ElementInfo {
        name: "result",
        kind: ElementKind::U16,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "error",
        kind: ElementKind::U16,
        array: ArrayKind::None,
    },
];

const RESULT_TLV: TlvInfo = TlvInfo {
    tlv_type: qmi::TLV_RESULT,
    required: true,
    element: ElementInfo {
        name: "result",
        kind: ElementKind::Struct(RESULT_EI),
        array: ArrayKind::None,
    },
};

const SENSOR_ID_INFO_EI: &[ElementInfo] = &[
    ElementInfo {
        name: "sensor_id",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "name",
        kind: ElementKind::U8,
        array: ArrayKind::Variable {
            max: MAX_NAME_LEN,
            len_width: LenWidth::U8,
        },
    },
];

pub static ALL_SENSOR_INFO_REQ: &[TlvInfo] = &[];

pub static ALL_SENSOR_INFO_RESP: &[TlvInfo] = &[
    RESULT_TLV,
    TlvInfo {
        tlv_type: 0x01,
        required: true,
        element: ElementInfo {
            name: "sensor_info",
            kind: ElementKind::Struct(SENSOR_ID_INFO_EI),
            array: ArrayKind::Variable {
                max: MAX_SENSORS,
                len_width: LenWidth::U8,
            },
        },
    },
];

const DATA_TYPE_INFO_EI: &[ElementInfo] = &[
    ElementInfo {
        name: "name",
        kind: ElementKind::U8,
        array: ArrayKind::Variable {
            max: MAX_NAME_LEN,
            len_width: LenWidth::U8,
        },
    },
    ElementInfo {
        name: "vendor",
        kind: ElementKind::U8,
        array: ArrayKind::Variable {
            max: MAX_NAME_LEN,
            len_width: LenWidth::U8,
        },
    },
    ElementInfo {
        name: "version",
        kind: ElementKind::U32,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "max_sample_rate",
        kind: ElementKind::U16,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "idle_power",
        kind: ElementKind::U32,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "max_power",
        kind: ElementKind::U32,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "max_range",
        kind: ElementKind::U32,
        array: ArrayKind::None,
    },
];

pub static SINGLE_SENSOR_INFO_REQ: &[TlvInfo] = &[TlvInfo {
    tlv_type: 0x01,
    required: true,
    element: ElementInfo {
        name: "sensor_id",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
}];

pub static SINGLE_SENSOR_INFO_RESP: &[TlvInfo] = &[
    RESULT_TLV,
    TlvInfo {
        tlv_type: 0x01,
        required: true,
        element: ElementInfo {
            name: "data_type_info",
            kind: ElementKind::Struct(DATA_TYPE_INFO_EI),
            array: ArrayKind::Variable {
                max: MAX_DATA_TYPES,
                len_width: LenWidth::U8,
            },
        },
    },
];

const BUFFERING_ITEM_EI: &[ElementInfo] = &[
    ElementInfo {
        name: "sensor_id",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "data_type",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "decimation",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "calibration",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
];

pub static BUFFERING_REQ: &[TlvInfo] = &[
    TlvInfo {
        tlv_type: 0x01,
        required: true,
        element: ElementInfo {
            name: "report_id",
            kind: ElementKind::U8,
            array: ArrayKind::None,
        },
    },
    TlvInfo {
        tlv_type: 0x02,
        required: true,
        element: ElementInfo {
            name: "action",
            kind: ElementKind::U8,
            array: ArrayKind::None,
        },
    },
    TlvInfo {
        tlv_type: 0x03,
        required: true,
        element: ElementInfo {
            name: "report_rate",
            kind: ElementKind::U32,
            array: ArrayKind::None,
        },
    },
    TlvInfo {
        tlv_type: 0x04,
        required: true,
        element: ElementInfo {
            name: "items",
            kind: ElementKind::Struct(BUFFERING_ITEM_EI),
            array: ArrayKind::Variable {
                max: MAX_REPORT_ITEMS,
                len_width: LenWidth::U8,
            },
        },
    },
];

pub static BUFFERING_RESP: &[TlvInfo] = &[
    RESULT_TLV,
    TlvInfo {
        tlv_type: 0x10,
        required: false,
        element: ElementInfo {
            name: "ack_nak",
            kind: ElementKind::U8,
            array: ArrayKind::None,
        },
    },
];

const IND_INDEX_EI: &[ElementInfo] = &[
    ElementInfo {
        name: "first_sample_idx",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "sample_count",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "first_sample_timestamp",
        kind: ElementKind::U32,
        array: ArrayKind::None,
    },
];

const IND_SAMPLE_EI: &[ElementInfo] = &[
    ElementInfo {
        name: "data",
        kind: ElementKind::U32,
        array: ArrayKind::Fixed(3),
    },
    ElementInfo {
        name: "time_offset",
        kind: ElementKind::U16,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "flags",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
    ElementInfo {
        name: "quality",
        kind: ElementKind::U8,
        array: ArrayKind::None,
    },
];

pub static BUFFERING_IND: &[TlvInfo] = &[
    TlvInfo {
        tlv_type: 0x01,
        required: true,
        element: ElementInfo {
            name: "report_id",
            kind: ElementKind::U8,
            array: ArrayKind::None,
        },
    },
    TlvInfo {
        tlv_type: 0x02,
        required: true,
        element: ElementInfo {
            name: "indices",
            kind: ElementKind::Struct(IND_INDEX_EI),
            array: ArrayKind::Variable {
                max: MAX_REPORT_ITEMS,
                len_width: LenWidth::U8,
            },
        },
    },
    TlvInfo {
        tlv_type: 0x03,
        required: true,
        element: ElementInfo {
            name: "samples",
            kind: ElementKind::Struct(IND_SAMPLE_EI),
            array: ArrayKind::Variable {
                max: MAX_SAMPLES,
                len_width: LenWidth::U16,
            },
        },
    },
];

// ============================================================================
// Typed views
// ============================================================================

/// One entry of the enumeration response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdInfo {
    pub sensor_id: u8,
    pub name: String,
}

/// One reporting channel from the detail response
///
/// `version`, `idle_power`, `max_power` and `max_range` are vendor-opaque;
/// they are carried through but never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypeInfo {
    pub name: String,
    pub vendor: String,
    pub version: u32,
    pub max_sample_rate: u16,
    pub idle_power: u32,
    pub max_power: u32,
    pub max_range: u32,
}

/// Buffering request parameters
#[derive(Debug, Clone)]
pub struct BufferingReq {
    pub report_id: u8,
    pub action: u8,
    pub report_rate: u32,
    pub items: Vec<BufferingItem>,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferingItem {
    pub sensor_id: u8,
    pub data_type: u8,
    pub decimation: u8,
    pub calibration: u8,
}

/// Decoded buffering-report indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferingInd {
    pub report_id: u8,
    pub indices: Vec<IndIndex>,
    pub samples: Vec<IndSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndIndex {
    pub first_sample_idx: u8,
    pub sample_count: u8,
    pub first_sample_timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndSample {
    pub data: [i32; 3],
    pub time_offset: u16,
    pub flags: u8,
    pub quality: u8,
}

fn string_value(value: &Value) -> Result<String> {
    Ok(String::from_utf8_lossy(&value.to_bytes()?).to_string())
}

fn required<'a>(slot: &'a Option<Value>, what: &'static str) -> Result<&'a Value> {
    slot.as_ref().ok_or(Error::Schema(what))
}

pub fn encode_all_sensor_info_req() -> Result<Vec<u8>> {
    encode_tlvs(ALL_SENSOR_INFO_REQ, &[])
}

pub fn decode_all_sensor_info_resp(payload: &[u8]) -> Result<Vec<SensorIdInfo>> {
    let slots = decode_tlvs(ALL_SENSOR_INFO_RESP, payload)?;
    qmi::check_result(required(&slots[0], "result slot")?)?;

    let mut out = Vec::new();
    for entry in required(&slots[1], "sensor_info slot")?.as_array()? {
        let fields = entry.as_struct()?;
        out.push(SensorIdInfo {
            sensor_id: fields[0].as_u8()?,
            name: string_value(&fields[1])?,
        });
    }
    Ok(out)
}

pub fn encode_single_sensor_info_req(sensor_id: u8) -> Result<Vec<u8>> {
    encode_tlvs(SINGLE_SENSOR_INFO_REQ, &[Some(Value::U8(sensor_id))])
}

pub fn decode_single_sensor_info_resp(payload: &[u8]) -> Result<Vec<DataTypeInfo>> {
    let slots = decode_tlvs(SINGLE_SENSOR_INFO_RESP, payload)?;
    qmi::check_result(required(&slots[0], "result slot")?)?;

    let mut out = Vec::new();
    for entry in required(&slots[1], "data_type_info slot")?.as_array()? {
        let fields = entry.as_struct()?;
        out.push(DataTypeInfo {
            name: string_value(&fields[0])?,
            vendor: string_value(&fields[1])?,
            version: fields[2].as_u32()?,
            max_sample_rate: fields[3].as_u16()?,
            idle_power: fields[4].as_u32()?,
            max_power: fields[5].as_u32()?,
            max_range: fields[6].as_u32()?,
        });
    }
    Ok(out)
}

pub fn encode_buffering_req(req: &BufferingReq) -> Result<Vec<u8>> {
    let items = req
        .items
        .iter()
        .map(|item| {
            Value::Struct(vec![
                Value::U8(item.sensor_id),
                Value::U8(item.data_type),
                Value::U8(item.decimation),
                Value::U8(item.calibration),
            ])
        })
        .collect();
    encode_tlvs(
        BUFFERING_REQ,
        &[
            Some(Value::U8(req.report_id)),
            Some(Value::U8(req.action)),
            Some(Value::U32(req.report_rate)),
            Some(Value::Array(items)),
        ],
    )
}

/// Check a buffering response: result TLV, then the optional negative
/// acknowledgement byte.
pub fn decode_buffering_resp(payload: &[u8]) -> Result<()> {
    let slots = decode_tlvs(BUFFERING_RESP, payload)?;
    qmi::check_result(required(&slots[0], "result slot")?)?;
    if let Some(ack) = &slots[1] {
        let ack = ack.as_u8()?;
        if ack != 0 {
            return Err(Error::Nak(ack));
        }
    }
    Ok(())
}

pub fn decode_buffering_ind(payload: &[u8]) -> Result<BufferingInd> {
    let slots = decode_tlvs(BUFFERING_IND, payload)?;

    let report_id = required(&slots[0], "report_id slot")?.as_u8()?;

    let mut indices = Vec::new();
    for entry in required(&slots[1], "indices slot")?.as_array()? {
        let fields = entry.as_struct()?;
        indices.push(IndIndex {
            first_sample_idx: fields[0].as_u8()?,
            sample_count: fields[1].as_u8()?,
            first_sample_timestamp: fields[2].as_u32()?,
        });
    }

    let mut samples = Vec::new();
    for entry in required(&slots[2], "samples slot")?.as_array()? {
        let fields = entry.as_struct()?;
        let axes = fields[0].as_array()?;
        if axes.len() != 3 {
            return Err(Error::BadPayload("sample axis count".to_string()));
        }
        samples.push(IndSample {
            data: [
                axes[0].as_u32()? as i32,
                axes[1].as_u32()? as i32,
                axes[2].as_u32()? as i32,
            ],
            time_offset: fields[1].as_u16()?,
            flags: fields[2].as_u8()?,
            quality: fields[3].as_u8()?,
        });
    }

    Ok(BufferingInd {
        report_id,
        indices,
        samples,
    })
}

// ============================================================================
// Response encoders, used by tests to script a firmware
// ============================================================================


#[cfg(test)]
mod tests {
    use super::testsupport::*;
    use super::*;

    #[test]
    fn test_enumerate_round_trip() {
        let payload =
            encode_all_sensor_info_resp(0, 0, &[(0, "ACCEL"), (10, "GYRO"), (20, "MAG")]);
        let sensors = decode_all_sensor_info_resp(&payload).unwrap();
        assert_eq!(sensors.len(), 3);
        assert_eq!(sensors[0].sensor_id, 0);
        assert_eq!(sensors[0].name, "ACCEL");
        assert_eq!(sensors[2].name, "MAG");
    }

    #[test]
    fn test_enumerate_remote_error() {
        let payload = encode_all_sensor_info_resp(1, 0x2E, &[]);
        match decode_all_sensor_info_resp(&payload) {
            Err(Error::Remote { result, error }) => {
                assert_eq!(result, 1);
                assert_eq!(error, 0x2E);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_detail_round_trip() {
        let dt = DataTypeInfo {
            name: "ACCEL".to_string(),
            vendor: "BOSCH".to_string(),
            version: 7,
            max_sample_rate: 200,
            idle_power: 10,
            max_power: 350,
            max_range: 16,
        };
        let payload = encode_single_sensor_info_resp(0, 0, &[dt.clone()]);
        let decoded = decode_single_sensor_info_resp(&payload).unwrap();
        assert_eq!(decoded, vec![dt]);
    }

    #[test]
    fn test_buffering_req_wire() {
        let req = BufferingReq {
            report_id: 7,
            action: ACTION_ADD,
            report_rate: 100,
            items: vec![BufferingItem {
                sensor_id: 7,
                data_type: 0,
                decimation: DECIMATION_RECENT_SAMPLE,
                calibration: CALIBRATION_FULL,
            }],
        };
        let payload = encode_buffering_req(&req).unwrap();

        // TLV 0x01: report_id
        assert_eq!(&payload[..4], &[0x01, 0x01, 0x00, 7]);
        // TLV 0x02: action
        assert_eq!(&payload[4..8], &[0x02, 0x01, 0x00, ACTION_ADD]);
        // TLV 0x03: report_rate, 4 bytes LE
        assert_eq!(&payload[8..15], &[0x03, 0x04, 0x00, 100, 0, 0, 0]);
        // TLV 0x04: one item behind a count byte
        assert_eq!(
            &payload[15..],
            &[0x04, 0x05, 0x00, 1, 7, 0, DECIMATION_RECENT_SAMPLE, CALIBRATION_FULL]
        );
    }

    #[test]
    fn test_buffering_resp_nak() {
        assert!(decode_buffering_resp(&encode_buffering_resp(0, 0, None)).is_ok());
        assert!(decode_buffering_resp(&encode_buffering_resp(0, 0, Some(0))).is_ok());
        match decode_buffering_resp(&encode_buffering_resp(0, 0, Some(3))) {
            Err(Error::Nak(3)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_indication_round_trip() {
        let payload = encode_buffering_ind(
            12,
            5000,
            &[([100, -200, 300], 0), ([101, -201, 301], 10)],
        );
        let ind = decode_buffering_ind(&payload).unwrap();
        assert_eq!(ind.report_id, 12);
        assert_eq!(ind.indices.len(), 1);
        assert_eq!(ind.indices[0].first_sample_timestamp, 5000);
        assert_eq!(ind.samples.len(), 2);
        assert_eq!(ind.samples[0].data, [100, -200, 300]);
        assert_eq!(ind.samples[1].time_offset, 10);
    }

    #[test]
    fn test_too_many_sensors_rejected() {
        // 33 sensors against a capacity of 32: hand-patch the count byte
        let mut payload = encode_all_sensor_info_resp(0, 0, &[(1, "A")]);
        let len = payload.len();
        payload[len - 4] = (MAX_SENSORS + 1) as u8;
        assert!(matches!(
            decode_all_sensor_info_resp(&payload),
            Err(Error::BadPayload(_))
        ));
    }
}
