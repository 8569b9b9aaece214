//! Request orchestration.
//!
//! One `Pipeline` serves every request of the process: it holds the signing
//! material loaded at startup, the admission gate and the stage handlers.
//! `process` never panics and always returns a [`SigningResult`], with the
//! scratch directory destroyed and the gate slot released on every path.

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use lopdf::Document;
use tracing::{error, info, instrument, warn};

use crate::{
    config::PipelineConfig,
    error::{DocumentReadError, Result},
    fetch::{DocumentFetcher, LocalFetcher},
    gate::ConcurrencyGate,
    publish::{DirectoryPublisher, ResultPublisher},
    scratch::ScratchSpace,
    security::EncryptionApplier,
    signing::{CertificateChain, ChainBuilder, DetachedSigner, SigningMaterial},
    types::{PipelineStage, RequestStatus, SigningRequest, SigningResult},
    watermark::WatermarkRenderer,
};

pub struct Pipeline {
    config: PipelineConfig,
    gate: ConcurrencyGate,
    renderer: WatermarkRenderer,
    encryptor: EncryptionApplier,
    signer: DetachedSigner,
    chain_builder: ChainBuilder,
    material: Arc<SigningMaterial>,
    fetcher: Arc<dyn DocumentFetcher>,
    publisher: Arc<dyn ResultPublisher>,
}

impl Pipeline {
    /// Builds a pipeline with the filesystem collaborators, loading the
    /// signing bundle once for the life of the process.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let material = SigningMaterial::load(&config.signature)?;
        let fetcher = Arc::new(LocalFetcher);
        let publisher = Arc::new(DirectoryPublisher::new(
            config.publish_root.clone(),
            config.public_base.clone(),
        ));
        Self::with_collaborators(config, material, fetcher, publisher)
    }

    /// Builds a pipeline around externally supplied material and adapters.
    pub fn with_collaborators(
        config: PipelineConfig,
        material: Arc<SigningMaterial>,
        fetcher: Arc<dyn DocumentFetcher>,
        publisher: Arc<dyn ResultPublisher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gate: ConcurrencyGate::new(&config.gate),
            renderer: WatermarkRenderer::new(config.watermark.clone()),
            encryptor: EncryptionApplier::new(config.encryption.clone()),
            signer: DetachedSigner::new(config.signature.clone()),
            chain_builder: ChainBuilder::new(config.signature.revocation),
            material,
            fetcher,
            publisher,
            config,
        })
    }

    /// Requests currently holding a gate slot.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Runs one request end to end. Never panics; failures come back as a
    /// result tagged with the stage that produced them.
    #[instrument(skip(self, request), fields(request_id = %request.id, case = %request.case_reference))]
    pub async fn process(&self, request: SigningRequest) -> SigningResult {
        let started = Instant::now();
        let outcome = self.execute(&request).await;

        let status = match &outcome {
            Ok(_) => RequestStatus::Completed,
            Err(e) => {
                error!(stage = e.stage_tag(), error = %e, "request failed");
                RequestStatus::Failed {
                    stage: e.stage_tag().to_string(),
                    message: e.to_string(),
                }
            }
        };
        SigningResult {
            request_id: request.id.clone(),
            status,
            output_locator: outcome.ok(),
            processed_at: Utc::now(),
            processing_time: started.elapsed(),
        }
    }

    /// Gate, scratch, stages. Scratch is destroyed whether the stages
    /// succeeded or not; a cleanup failure is logged and never replaces the
    /// stage outcome.
    async fn execute(&self, request: &SigningRequest) -> Result<String> {
        let _slot = self.gate.acquire().await?;
        let scratch = ScratchSpace::create(&self.config.scratch_root, &request.id).await?;

        let outcome = self.run_stages(request, &scratch).await;

        if let Err(warning) = scratch.destroy().await {
            warn!(%warning, "scratch cleanup failed");
        }
        outcome
    }

    async fn run_stages(&self, request: &SigningRequest, scratch: &ScratchSpace) -> Result<String> {
        let artifact_name = request.artifact_name();

        info!(stage = %PipelineStage::Fetching, source = %request.source, "fetching source document");
        let fetched = self.fetcher.fetch(&request.source, scratch.path()).await?;

        info!(stage = %PipelineStage::Rendering, "rendering watermark overlays");
        let watermarked = scratch.path().join("watermarked.pdf");
        let geometries = self
            .renderer
            .render(&fetched, &watermarked, &artifact_name)
            .await?;

        info!(stage = %PipelineStage::Signing, pages = geometries.len(), "encrypting and signing");
        let chain = self.chain_builder.build(&self.material)?;
        let signed = scratch.path().join(&artifact_name);
        self.encrypt_and_sign(&watermarked, &signed, &chain).await?;

        info!(stage = %PipelineStage::Publishing, artifact = artifact_name, "publishing artifact");
        let locator = self.publisher.publish(&signed, &artifact_name).await?;

        info!(stage = %PipelineStage::Completed, locator, "request completed");
        Ok(locator)
    }

    /// Metadata, then encryption, then the signature: the signature patch is
    /// the final mutation of the write pass, applied after every string and
    /// stream is already encrypted.
    async fn encrypt_and_sign(
        &self,
        watermarked: &std::path::Path,
        signed: &std::path::Path,
        chain: &CertificateChain,
    ) -> Result<()> {
        let bytes = tokio::fs::read(watermarked).await?;
        let mut doc = Document::load_mem(&bytes)
            .map_err(|e| DocumentReadError::Malformed(e.to_string()))?;

        self.signer.apply_metadata(&mut doc, &bytes)?;
        let cipher = self.encryptor.encrypt(&mut doc)?;
        self.signer
            .sign(doc, signed, &self.material, chain, Some(&cipher))
            .await
    }
}
