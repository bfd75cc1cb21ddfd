//! Typed image jobs and their wire encoding.
//!
//! On the queue a job is a kind string plus a JSON payload of the form
//! `{ key, imageId, userId, operationData? }`. Inside the process it is an
//! [`ImageJob`]: the target image plus one [`Operation`] from a closed set.

use crate::error::{JobError, Result};
use imgpipe_core::{CodecError, ImageFormat, ImageId, Transform, UserId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

pub const RESIZE: &str = "image:resize";
pub const ROTATE: &str = "image:rotate";
pub const FLIP: &str = "image:flip";
pub const MIRROR: &str = "image:mirror";
pub const FORMAT: &str = "image:format";
pub const ALL_OPERATIONS: &str = "image:allOperations";

/// Every kind this build can process
pub const KINDS: [&str; 6] = [RESIZE, ROTATE, FLIP, MIRROR, FORMAT, ALL_OPERATIONS];

const OPERATION_DATA: &str = "operationData";

/// The image a job operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTarget {
    /// Blob key of the source bytes
    pub key: String,
    pub image_id: ImageId,
    pub user_id: UserId,
}

impl JobTarget {
    pub fn new(key: impl Into<String>, image_id: ImageId, user_id: UserId) -> Self {
        Self {
            key: key.into(),
            image_id,
            user_id,
        }
    }

    /// Best-effort recovery of the target from a payload that failed to
    /// decode as a whole.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotateParams {
    pub degree: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatParams {
    pub desired_format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Resize(ResizeParams),
    Rotate(RotateParams),
    Flip,
    Mirror,
    Format(FormatParams),
    Composite(CompositeParams),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resize(_) => RESIZE,
            Self::Rotate(_) => ROTATE,
            Self::Flip => FLIP,
            Self::Mirror => MIRROR,
            Self::Format(_) => FORMAT,
            Self::Composite(_) => ALL_OPERATIONS,
        }
    }

    /// Check the arguments and build the codec transform.
    pub fn transform(&self) -> std::result::Result<Transform, CodecError> {
        match self {
            Self::Resize(p) => Ok(Transform::new().resize(
                dimension("width", p.width)?,
                dimension("height", p.height)?,
            )),
            Self::Rotate(p) => Ok(Transform::new().rotate(degrees(p.degree)?)),
            Self::Flip => Ok(Transform::new().flip()),
            Self::Mirror => Ok(Transform::new().mirror()),
            Self::Format(p) => Ok(Transform::new().convert(parse_format(&p.desired_format)?)),
            Self::Composite(p) => {
                let mut transform = Transform::new();
                match (p.width, p.height) {
                    (Some(w), Some(h)) => {
                        transform =
                            transform.resize(dimension("width", w)?, dimension("height", h)?);
                    }
                    (None, None) => {}
                    _ => {
                        return Err(CodecError::invalid(
                            "width and height must be given together",
                        ))
                    }
                }
                if let Some(degree) = p.degree {
                    transform = transform.rotate(degrees(degree)?);
                }
                if let Some(desired) = &p.desired_format {
                    transform = transform.convert(parse_format(desired)?);
                }
                if transform.steps().is_empty() {
                    return Err(CodecError::invalid("no operation requested"));
                }
                Ok(transform)
            }
        }
    }

    fn data(&self) -> serde_json::Result<Option<Value>> {
        Ok(match self {
            Self::Resize(p) => Some(serde_json::to_value(p)?),
            Self::Rotate(p) => Some(serde_json::to_value(p)?),
            Self::Format(p) => Some(serde_json::to_value(p)?),
            Self::Composite(p) => Some(serde_json::to_value(p)?),
            Self::Flip | Self::Mirror => None,
        })
    }

    /// Leaf name of the derived object written for this operation
    fn output_stem(&self) -> String {
        match self {
            Self::Resize(p) => format!("resized-{}x{}", p.width, p.height),
            Self::Rotate(_) => "rotated".to_string(),
            Self::Flip => "flipped".to_string(),
            Self::Mirror => "mirrored".to_string(),
            Self::Format(_) => "converted".to_string(),
            Self::Composite(_) => "edited".to_string(),
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            Self::Resize(_) => "Image resized successfully",
            Self::Rotate(_) => "Image rotated successfully",
            Self::Flip => "Image flipped successfully",
            Self::Mirror => "Image mirrored successfully",
            Self::Format(_) => "Image format changed successfully",
            Self::Composite(_) => "Image transformed successfully",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            Self::Resize(_) => "Image resize failed",
            Self::Rotate(_) => "Image rotation failed",
            Self::Flip => "Image flip failed",
            Self::Mirror => "Image mirror failed",
            Self::Format(_) => "Image format change failed",
            Self::Composite(_) => "Image transformation failed",
        }
    }
}

fn dimension(name: &str, value: u32) -> std::result::Result<u32, CodecError> {
    if value == 0 {
        return Err(CodecError::invalid(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

fn degrees(value: f64) -> std::result::Result<f64, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::invalid("degree must be a finite number"));
    }
    Ok(value)
}

fn parse_format(value: &str) -> std::result::Result<ImageFormat, CodecError> {
    value
        .parse()
        .map_err(|_| CodecError::invalid(format!("unsupported format: {value}")))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub target: JobTarget,
    pub operation: Operation,
}

impl ImageJob {
    pub fn new(target: JobTarget, operation: Operation) -> Self {
        Self { target, operation }
    }

    pub fn kind(&self) -> &'static str {
        self.operation.kind()
    }

    pub fn payload(&self) -> Result<Value> {
        let mut value = serde_json::to_value(&self.target)?;
        if let (Some(data), Value::Object(map)) = (self.operation.data()?, &mut value) {
            map.insert(OPERATION_DATA.to_string(), data);
        }
        Ok(value)
    }

    /// Decode a stored job. Fails with [`JobError::UnknownJobType`] for kinds
    /// this build does not know and [`JobError::InvalidPayload`] for payloads
    /// that do not match their kind.
    pub fn decode(kind: &str, payload: &Value) -> Result<Self> {
        if !KINDS.contains(&kind) {
            return Err(JobError::UnknownJobType(kind.to_string()));
        }

        let target: JobTarget = serde_json::from_value(payload.clone())
            .map_err(|e| invalid_payload(kind, e))?;
        let data = payload.get(OPERATION_DATA);

        let operation = match kind {
            RESIZE => Operation::Resize(operation_data(kind, data)?),
            ROTATE => Operation::Rotate(operation_data(kind, data)?),
            FLIP => Operation::Flip,
            MIRROR => Operation::Mirror,
            FORMAT => Operation::Format(operation_data(kind, data)?),
            _ => Operation::Composite(operation_data(kind, data)?),
        };

        Ok(Self { target, operation })
    }

    pub fn transform(&self) -> std::result::Result<Transform, CodecError> {
        self.operation.transform()
    }

    /// Blob key the result is written to
    pub fn output_key(&self, format: ImageFormat) -> String {
        format!(
            "uploads/{}/{}.{}",
            self.target.image_id,
            self.operation.output_stem(),
            format.extension()
        )
    }
}

fn operation_data<P: DeserializeOwned>(kind: &str, data: Option<&Value>) -> Result<P> {
    let data = data.ok_or_else(|| JobError::InvalidPayload {
        kind: kind.to_string(),
        reason: format!("missing {OPERATION_DATA}"),
    })?;
    serde_json::from_value(data.clone()).map_err(|e| invalid_payload(kind, e))
}

fn invalid_payload(kind: &str, e: serde_json::Error) -> JobError {
    JobError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> JobTarget {
        JobTarget::new("uploads/img-1/original.png", "img-1".into(), "42".into())
    }

    #[test]
    fn test_resize_payload_shape() {
        let job = ImageJob::new(
            target(),
            Operation::Resize(ResizeParams { width: 200, height: 100 }),
        );
        assert_eq!(job.kind(), "image:resize");
        assert_eq!(
            job.payload().unwrap(),
            json!({
                "key": "uploads/img-1/original.png",
                "imageId": "img-1",
                "userId": "42",
                "operationData": { "width": 200, "height": 100 }
            })
        );
    }

    #[test]
    fn test_flip_has_no_operation_data() {
        let job = ImageJob::new(target(), Operation::Flip);
        let payload = job.payload().unwrap();
        assert!(payload.get("operationData").is_none());
        assert_eq!(ImageJob::decode(FLIP, &payload).unwrap(), job);
    }

    #[test]
    fn test_decode_wire_payloads() {
        let base = json!({ "key": "k", "imageId": "i", "userId": "u" });

        let mut rotate = base.clone();
        rotate["operationData"] = json!({ "degree": 90 });
        let job = ImageJob::decode(ROTATE, &rotate).unwrap();
        assert_eq!(job.operation, Operation::Rotate(RotateParams { degree: 90.0 }));

        let mut format = base.clone();
        format["operationData"] = json!({ "desiredFormat": "webp" });
        let job = ImageJob::decode(FORMAT, &format).unwrap();
        assert_eq!(job.transform().unwrap().target_format(), Some(ImageFormat::Webp));

        let mut all = base;
        all["operationData"] = json!({ "width": 10, "height": 20, "degree": 180 });
        let job = ImageJob::decode(ALL_OPERATIONS, &all).unwrap();
        assert_eq!(job.transform().unwrap().steps().len(), 2);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = ImageJob::decode("image:watermark", &json!({})).unwrap_err();
        assert!(matches!(err, JobError::UnknownJobType(kind) if kind == "image:watermark"));
    }

    #[test]
    fn test_payload_mismatch_rejected() {
        let payload = json!({ "key": "k", "imageId": "i", "userId": "u" });
        let err = ImageJob::decode(RESIZE, &payload).unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { .. }));
    }

    #[test]
    fn test_invalid_parameters() {
        let zero = Operation::Resize(ResizeParams { width: 0, height: 10 });
        assert!(zero.transform().unwrap_err().is_permanent());

        let bad_format = Operation::Format(FormatParams { desired_format: "psd".into() });
        assert!(bad_format.transform().unwrap_err().is_permanent());

        let half = Operation::Composite(CompositeParams { width: Some(5), ..Default::default() });
        assert!(half.transform().is_err());

        assert!(Operation::Composite(CompositeParams::default()).transform().is_err());
    }

    #[test]
    fn test_output_keys() {
        let resize = ImageJob::new(target(), Operation::Resize(ResizeParams { width: 300, height: 200 }));
        assert_eq!(resize.output_key(ImageFormat::Png), "uploads/img-1/resized-300x200.png");

        let mirror = ImageJob::new(target(), Operation::Mirror);
        assert_eq!(mirror.output_key(ImageFormat::Jpeg), "uploads/img-1/mirrored.jpg");
    }
}
