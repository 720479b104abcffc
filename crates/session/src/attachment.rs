use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agri_chat_client::{
    BoxFuture, ClientError, Coordinates, SensorSource, SoilReading, WeatherReport,
};
use snafu::{ResultExt, Snafu};

pub const MAX_IMAGE_SIZE: u64 = 5_242_880;
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp"];
/// Joins attachment contexts with each other and with the typed question.
pub const CONTEXT_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Weather,
    Soil,
    Image,
}

impl AttachmentKind {
    pub const ALL: [Self; 3] = [Self::Weather, Self::Soil, Self::Image];

    pub fn name(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Soil => "soil moisture",
            Self::Image => "image",
        }
    }

    /// Badge icon name for the presentation layer.
    pub fn icon(self) -> &'static str {
        match self {
            Self::Weather => "cloud",
            Self::Soil => "leaf",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub kind: AttachmentKind,
    /// Badge text shown to the user.
    pub label: String,
    /// Machine text injected into the question at send time.
    pub context: String,
    pub source_file: Option<PathBuf>,
}

/// Raw data collected for one attachment kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentPayload {
    Weather(WeatherReport),
    Soil(SoilReading),
    Image(PathBuf),
}

impl AttachmentPayload {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Self::Weather(_) => AttachmentKind::Weather,
            Self::Soil(_) => AttachmentKind::Soil,
            Self::Image(_) => AttachmentKind::Image,
        }
    }

    fn into_attachment(self, id: AttachmentId) -> Attachment {
        let kind = self.kind();
        let (label, context, source_file) = match self {
            Self::Weather(report) => {
                let temperature = format_measure(report.temperature_celsius);
                (
                    format!("{} {temperature}°C", report.condition),
                    format!("[Weather: {}, {temperature}°C]", report.condition),
                    None,
                )
            }
            Self::Soil(reading) => {
                let percent = format_measure(reading.moisture_percent);
                let context = match reading.status {
                    Some(status) => format!("[Soil moisture: {percent}% ({status})]"),
                    None => format!("[Soil moisture: {percent}%]"),
                };
                (format!("Soil {percent}%"), context, None)
            }
            Self::Image(path) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                let context = format!("[Image: {file_name}]");
                (file_name, context, Some(path))
            }
        };

        Attachment {
            id,
            kind,
            label,
            context,
            source_file,
        }
    }
}

/// Rounds to one decimal and drops a trailing `.0`.
fn format_measure(value: f64) -> String {
    // Adding zero folds -0.0 into 0.0.
    let rounded = (value * 10.0).round() / 10.0 + 0.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded:.1}")
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AttachmentError {
    #[snafu(display("could not fetch {sensor} data, {source}"))]
    Sensor {
        stage: &'static str,
        sensor: &'static str,
        source: ClientError,
    },
    #[snafu(display("cannot read image '{}', {source}", path.display()))]
    ImageUnreadable {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("image '{}' is {size} bytes, the limit is {max}", path.display()))]
    ImageTooLarge {
        stage: &'static str,
        path: PathBuf,
        size: u64,
        max: u64,
    },
    #[snafu(display("'{}' is not a supported image type", path.display()))]
    UnsupportedImage { stage: &'static str, path: PathBuf },
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// Checks that `path` names an existing image file within the size limit.
pub fn validate_image(path: &Path) -> AttachmentResult<()> {
    let metadata = std::fs::metadata(path).context(ImageUnreadableSnafu {
        stage: "image-metadata",
        path,
    })?;

    let size = metadata.len();
    snafu::ensure!(
        size <= MAX_IMAGE_SIZE,
        ImageTooLargeSnafu {
            stage: "image-size",
            path,
            size,
            max: MAX_IMAGE_SIZE,
        }
    );

    let supported = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .is_some_and(|extension| IMAGE_EXTENSIONS.contains(&extension.as_str()));
    snafu::ensure!(
        supported,
        UnsupportedImageSnafu {
            stage: "image-extension",
            path,
        }
    );

    Ok(())
}

/// Side-effecting collection behind `AttachmentBuilder::add`.
///
/// `Ok(None)` means the user backed out (for example closed a file picker).
pub trait AttachmentSource: Send + Sync {
    fn collect<'a>(
        &'a self,
        kind: AttachmentKind,
    ) -> BoxFuture<'a, AttachmentResult<Option<AttachmentPayload>>>;
}

/// Local file selection supplied by the front-end.
pub trait ImagePicker: Send + Sync {
    fn pick_image<'a>(&'a self) -> BoxFuture<'a, Option<PathBuf>>;
}

/// Collects weather and soil data from the backend and images from a picker.
pub struct SensorAttachmentSource {
    sensors: Arc<dyn SensorSource>,
    images: Arc<dyn ImagePicker>,
    coordinates: Coordinates,
}

impl SensorAttachmentSource {
    pub fn new(
        sensors: Arc<dyn SensorSource>,
        images: Arc<dyn ImagePicker>,
        coordinates: Coordinates,
    ) -> Self {
        Self {
            sensors,
            images,
            coordinates,
        }
    }
}

impl AttachmentSource for SensorAttachmentSource {
    fn collect<'a>(
        &'a self,
        kind: AttachmentKind,
    ) -> BoxFuture<'a, AttachmentResult<Option<AttachmentPayload>>> {
        Box::pin(async move {
            let payload = match kind {
                AttachmentKind::Weather => {
                    let report = self
                        .sensors
                        .fetch_weather(self.coordinates)
                        .await
                        .context(SensorSnafu {
                            stage: "fetch-weather",
                            sensor: "weather",
                        })?;
                    AttachmentPayload::Weather(report)
                }
                AttachmentKind::Soil => {
                    let reading = self
                        .sensors
                        .fetch_soil_moisture()
                        .await
                        .context(SensorSnafu {
                            stage: "fetch-soil-moisture",
                            sensor: "soil moisture",
                        })?;
                    AttachmentPayload::Soil(reading)
                }
                AttachmentKind::Image => {
                    let Some(path) = self.images.pick_image().await else {
                        return Ok(None);
                    };
                    validate_image(&path)?;
                    AttachmentPayload::Image(path)
                }
            };
            Ok(Some(payload))
        })
    }
}

#[derive(Debug)]
pub enum AddOutcome {
    Added(AttachmentId),
    /// A `kind` attachment is already held; nothing was fetched.
    Duplicate(AttachmentKind),
    Cancelled,
    Failed(AttachmentError),
}

/// Attachments held for the next send, at most one per kind.
pub struct AttachmentBuilder {
    source: Arc<dyn AttachmentSource>,
    attachments: Vec<Attachment>,
    next_id: u64,
}

impl AttachmentBuilder {
    pub fn new(source: Arc<dyn AttachmentSource>) -> Self {
        Self {
            source,
            attachments: Vec::new(),
            next_id: 1,
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    pub fn holds(&self, kind: AttachmentKind) -> bool {
        self.attachments
            .iter()
            .any(|attachment| attachment.kind == kind)
    }

    pub async fn add(&mut self, kind: AttachmentKind) -> AddOutcome {
        if self.holds(kind) {
            return AddOutcome::Duplicate(kind);
        }

        let payload = match self.source.collect(kind).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return AddOutcome::Cancelled,
            Err(error) => {
                tracing::warn!(kind = %kind, error = %error, "attachment collection failed");
                return AddOutcome::Failed(error);
            }
        };

        // The source may answer with another kind; the per-kind rule still holds.
        let payload_kind = payload.kind();
        if self.holds(payload_kind) {
            return AddOutcome::Duplicate(payload_kind);
        }

        let id = AttachmentId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.attachments.push(payload.into_attachment(id));
        AddOutcome::Added(id)
    }

    pub fn remove(&mut self, id: AttachmentId) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|attachment| attachment.id != id);
        self.attachments.len() != before
    }

    /// Every held context in insertion order, joined by the separator.
    pub fn compose_context(&self) -> String {
        self.attachments
            .iter()
            .map(|attachment| attachment.context.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    pub fn clear(&mut self) {
        self.attachments.clear();
    }
}
