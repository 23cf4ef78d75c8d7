use iced::widget::{button, column, container, row, scrollable, text, text_input, Column};
use iced::{Element, Length, Size, Subscription, Task, Theme};
use rfd::FileDialog;
use std::time::Duration;

mod caption;
mod error;
mod logging;
mod state;
mod ui;

use caption::{CaptionPipeline, PollReport, WorkerState};
use state::data::{ImageId, ImageRef};
use state::library::{scan_directory_async, ImageLibrary, KnownFiles};
use state::settings::Settings;
use state::store::CaptionStore;
use ui::preview::{load_preview, Preview};

/// How long closing the window waits for an in-progress caption
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Main application state
struct Captioner {
    settings: Settings,
    /// Background captioning; None if the worker thread could not start
    pipeline: Option<CaptionPipeline>,
    /// Listing of the open directory
    library: Option<ImageLibrary>,
    /// Sidecar files of the open directory
    store: Option<CaptionStore>,
    /// Index into `library.images()` of the selected row
    selected: Option<usize>,
    /// Identifier of the image on screen; read by every poll tick
    selection: Option<ImageId>,
    /// Contents of the caption field
    caption: String,
    preview: Option<Preview>,
    /// Status message to display to the user
    status: String,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    /// User clicked "select directory"
    SelectDirectory,
    /// Background directory scan finished
    DirectoryScanned(Result<ImageLibrary, String>),
    /// User picked an image in the list
    ImageSelected(usize),
    /// Background preview decode finished
    PreviewLoaded(Result<Preview, String>),
    /// User typed in the caption field
    CaptionEdited(String),
    /// User asked to regenerate the caption of the selected image
    GenerateCaption,
    /// Timer tick: drain finished captions
    PollResults,
}

impl Captioner {
    /// Create a new instance of the application
    fn new() -> (Self, Task<Message>) {
        let settings = Settings::load_or_default();

        let (pipeline, status) = match CaptionPipeline::start(&settings) {
            Ok(pipeline) => (Some(pipeline), "Loading caption model...".to_string()),
            Err(e) => {
                tracing::error!("❌ {}", e);
                (None, format!("Captioning unavailable: {}", e))
            }
        };

        // Reopen the last directory if it is still there
        let task = match settings.last_directory.clone() {
            Some(dir) if dir.is_dir() => scan(dir, &settings),
            _ => Task::none(),
        };

        (
            Captioner {
                settings,
                pipeline,
                library: None,
                store: None,
                selected: None,
                selection: None,
                caption: String::new(),
                preview: None,
                status,
            },
            task,
        )
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::SelectDirectory => {
                let folder = FileDialog::new().set_title("select directory").pick_folder();

                if let Some(folder) = folder {
                    self.status = format!("Scanning {}...", folder.display());
                    return scan(folder, &self.settings);
                }
                Task::none()
            }
            Message::DirectoryScanned(Ok(library)) => {
                self.open_library(library);
                Task::none()
            }
            Message::DirectoryScanned(Err(e)) => {
                self.status = format!("⚠️  {}", e);
                Task::none()
            }
            Message::ImageSelected(index) => self.select(index),
            Message::PreviewLoaded(Ok(preview)) => {
                // Ignore previews for images the user already moved past
                if self.selection.as_ref() == Some(&preview.id) {
                    self.preview = Some(preview);
                }
                Task::none()
            }
            Message::PreviewLoaded(Err(e)) => {
                self.status = format!("⚠️  {}", e);
                Task::none()
            }
            Message::CaptionEdited(text) => {
                self.caption = text;
                self.save_caption();
                Task::none()
            }
            Message::GenerateCaption => {
                if let Some(image) = self.selected_image() {
                    self.generate(image);
                }
                Task::none()
            }
            Message::PollResults => {
                self.poll();
                Task::none()
            }
        }
    }

    fn open_library(&mut self, library: ImageLibrary) {
        let store = CaptionStore::new(library.root());
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.rebind(store.clone());
        }

        self.status = format!(
            "{} images, {} captions in {}",
            library.images().len(),
            library.known_files().len(),
            library.root().display()
        );
        self.settings.last_directory = Some(library.root().to_path_buf());
        if let Err(e) = self.settings.save() {
            tracing::warn!("⚠️  Could not save settings: {}", e);
        }

        self.store = Some(store);
        self.library = Some(library);
        self.selected = None;
        self.selection = None;
        self.caption.clear();
        self.preview = None;
    }

    fn selected_image(&self) -> Option<ImageRef> {
        let library = self.library.as_ref()?;
        library.image(self.selected?).cloned()
    }

    /// Show an image: load its caption if it has one, otherwise request one
    fn select(&mut self, index: usize) -> Task<Message> {
        let (Some(library), Some(store)) = (self.library.as_ref(), self.store.as_ref()) else {
            return Task::none();
        };
        let Some(image) = library.image(index).cloned() else {
            return Task::none();
        };

        self.selected = Some(index);
        self.selection = Some(image.id().clone());
        self.preview = None;
        self.caption.clear();

        let existing = if library.needs_caption(&image, store) {
            None
        } else {
            match store.load(&image) {
                Ok(record) => record.map(|record| record.text),
                Err(e) => {
                    // Don't overwrite a caption we failed to read
                    self.status = format!("⚠️  {}", e);
                    Some(String::new())
                }
            }
        };

        match existing {
            Some(text) => self.caption = text,
            None => self.request(image.clone()),
        }

        Task::perform(
            load_preview(
                image.id().clone(),
                image.path().to_path_buf(),
                self.settings.preview_size,
            ),
            |result| Message::PreviewLoaded(result.map_err(|e| e.to_string())),
        )
    }

    /// Ask for a caption unless one is already being generated
    fn request(&mut self, image: ImageRef) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            self.status = "Captioning unavailable".to_string();
            return;
        };

        match pipeline.request(image.clone()) {
            Ok(_) => self.status = format!("⏳ Generating caption for {}...", image.id()),
            Err(e) => self.status = format!("⚠️  {}", e),
        }
    }

    /// Always queue a new job, even if one is in flight
    fn generate(&mut self, image: ImageRef) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            self.status = "Captioning unavailable".to_string();
            return;
        };

        match pipeline.submit(image.clone()) {
            Ok(_) => self.status = format!("⏳ Generating caption for {}...", image.id()),
            Err(e) => self.status = format!("⚠️  {}", e),
        }
    }

    /// Write-through for manual edits
    fn save_caption(&mut self) {
        let (Some(id), Some(store)) = (self.selection.as_ref(), self.store.as_ref()) else {
            return;
        };

        match store.write(id, &self.caption) {
            Ok(path) => {
                if let Some(library) = self.library.as_mut() {
                    library.known_files_mut().insert(path);
                }
            }
            Err(e) => {
                tracing::error!("❌ {}", e);
                self.status = format!("⚠️  Caption not saved: {}", e);
            }
        }
    }

    fn poll(&mut self) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        let mut scratch = KnownFiles::default();
        let known = match self.library.as_mut() {
            Some(library) => library.known_files_mut(),
            None => &mut scratch,
        };

        let report = pipeline.poll(self.selection.as_ref(), known);
        let worker_state = pipeline.worker_state();
        self.apply_report(report, worker_state);
    }

    fn apply_report(&mut self, report: PollReport, worker_state: WorkerState) {
        if let Some(text) = report.live {
            self.caption = text;
        }

        if let Some((id, _)) = report.persisted.last() {
            self.status = format!("✅ Caption saved for {}", id);
        }
        if worker_state == WorkerState::Ready && self.status.starts_with("Loading caption model") {
            self.status = "Ready. Select a directory.".to_string();
        }
        for failure in &report.failures {
            self.status = format!(
                "⚠️  Could not caption {}: {}",
                failure.image.id(),
                failure.reason
            );
        }
        if let Some(e) = report.store_errors.last() {
            self.status = format!("⚠️  {}", e);
        }
        if let Some(reason) = report.worker_unavailable {
            self.status = format!("Captioning unavailable: {}", reason);
        } else if report.worker_lost && self.status.starts_with('⏳') {
            self.status = "⚠️  Caption worker stopped".to_string();
        }
    }

    /// Build the user interface
    fn view(&self) -> Element<Message> {
        let generating = |id: &ImageId| {
            self.pipeline
                .as_ref()
                .is_some_and(|pipeline| pipeline.is_generating(id))
        };

        let mut list = Column::new().spacing(2);
        if let Some(library) = &self.library {
            for (index, image) in library.images().iter().enumerate() {
                let label = if generating(image.id()) {
                    format!("⏳ {}", image.id())
                } else {
                    image.id().to_string()
                };
                let style = if self.selected == Some(index) {
                    button::primary
                } else {
                    button::text
                };
                list = list.push(
                    button(text(label))
                        .on_press(Message::ImageSelected(index))
                        .width(Length::Fill)
                        .style(style),
                );
            }
        }

        let aside = column![
            button("select directory")
                .on_press(Message::SelectDirectory)
                .padding(5),
            scrollable(list).height(Length::Fill),
        ]
        .spacing(5)
        .padding(5)
        .width(Length::Fixed(200.0));

        let canvas: Element<Message> = match &self.preview {
            Some(preview) => iced::widget::image(preview.handle.clone())
                .width(Length::Fixed(preview.width as f32))
                .height(Length::Fixed(preview.height as f32))
                .into(),
            None => text("").into(),
        };

        let has_selection = self.selection.is_some();
        let caption_row = row![
            text_input("caption", &self.caption)
                .on_input_maybe(has_selection.then_some(Message::CaptionEdited))
                .padding(5)
                .width(Length::Fill),
            button("generate caption")
                .on_press_maybe(has_selection.then_some(Message::GenerateCaption))
                .padding(5),
        ]
        .spacing(5);

        let queued = match self.pipeline.as_ref().map(CaptionPipeline::pending) {
            Some(0) | None => String::new(),
            Some(n) => format!("{} captions queued", n),
        };

        let main = column![
            container(canvas)
                .width(Length::Fill)
                .height(Length::Fill)
                .center_x(Length::Fill)
                .center_y(Length::Fill),
            caption_row,
            row![text(&self.status).size(14).width(Length::Fill), text(queued).size(14)],
        ]
        .spacing(5)
        .padding(5);

        row![aside, main].into()
    }

    /// Drain finished captions on a fixed interval
    fn subscription(&self) -> Subscription<Message> {
        iced::time::every(self.settings.poll_interval()).map(|_| Message::PollResults)
    }

    /// Set the application theme
    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

impl Drop for Captioner {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            match pipeline.shutdown(SHUTDOWN_GRACE) {
                Ok(true) => {}
                Ok(false) => tracing::info!("🛑 Leaving caption worker to finish its current job"),
                Err(e) => tracing::warn!("⚠️  {}", e),
            }
        }
    }
}

/// Launch a background scan of `dir`
fn scan(dir: std::path::PathBuf, settings: &Settings) -> Task<Message> {
    Task::perform(
        scan_directory_async(dir, settings.extensions.clone()),
        |result| Message::DirectoryScanned(result.map_err(|e| e.to_string())),
    )
}

fn main() -> iced::Result {
    logging::init();

    iced::application("Image Captioner", Captioner::update, Captioner::view)
        .subscription(Captioner::subscription)
        .theme(Captioner::theme)
        .window_size(Size::new(800.0, 600.0))
        .centered()
        .run_with(Captioner::new)
}
