//! Reading object branches basket by basket.
//!
//! The first basket whose entries fully describe the branch type yields a
//! compiled model (program plus form), which is cached under the type
//! signature, read options and reachable class layouts, and reused for every
//! later basket. Until then, and for types that cannot be
//! generated at all, baskets are read entry by entry on the interpreted path.

use std::sync::Arc;

use rayon::prelude::*;

use crate::basket::{Basket, BasketContext, decode_baskets};
use crate::context::{ReadContext, ReadOptions};
use crate::cursor::Cursor;
use crate::decompress::Decompressor;
use crate::error::{Result, RootError};
use crate::forth::cache::ModelCache;
use crate::forth::generator::ForthGenerator;
use crate::forth::program::CompiledModel;
use crate::model::{ClassRegistry, Streamer, TypeDesc, Value};

/// What one basket produced.
#[derive(Debug, Clone)]
pub enum BasketArray {
    /// Decode the basket with this model's program.
    Compiled(Arc<CompiledModel>),
    /// Values read on the interpreted path, one per entry.
    Interpreted(Vec<Value>),
}

/// Interpretation of a branch whose entries are streamed objects.
pub struct ObjectInterpretation {
    ty: TypeDesc,
    registry: Arc<ClassRegistry>,
    options: ReadOptions,
    cache: Arc<ModelCache>,
    cache_key: String,
}

impl ObjectInterpretation {
    /// Interpret entries as `ty`, resolving classes in `registry`.
    pub fn new(ty: TypeDesc, registry: Arc<ClassRegistry>, options: ReadOptions) -> Self {
        let cache = Arc::new(ModelCache::new(options.cache));
        let cache_key = model_key(&ty, &registry, &options);
        Self { ty, registry, options, cache, cache_key }
    }

    /// Share a model cache with other interpretations.
    pub fn with_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The entry type.
    pub fn type_desc(&self) -> &TypeDesc {
        &self.ty
    }

    /// The model cache in use.
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Key of this interpretation's model in the cache.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// The compiled model for this type, generating it from `basket` if no
    /// earlier basket did.
    ///
    /// `Ok(None)` means the type cannot be generated, or no entry of this
    /// basket exercised every part of it.
    pub fn compile(&self, basket: &Basket) -> Result<Option<Arc<CompiledModel>>> {
        self.cache.get_or_try_build(&self.cache_key, || self.discover(basket))
    }

    fn discover(&self, basket: &Basket) -> Result<Option<CompiledModel>> {
        let signature = self.ty.signature();
        let entries = entries(basket)?;
        let streamer = Streamer::new(&self.registry);
        let ctx = ReadContext::new(&self.options);
        let mut generator = ForthGenerator::new();

        for (i, entry) in entries.enumerate() {
            generator.begin_entry();
            let mut cursor = Cursor::new(entry?);
            match streamer.read(&self.ty, None, &mut cursor, &ctx, Some(&mut generator)) {
                Ok(_) => {}
                Err(RootError::CannotGenerate(reason)) => {
                    log::debug!("{signature}: falling back to interpreted reads: {reason}");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
            if !generator.is_incomplete() {
                let compiled = generator.compile()?;
                log::debug!(
                    "{signature}: decoder generated from entry {i} of basket {:?} ({} nodes, {} orphaned)",
                    basket.basket_num(),
                    compiled.model.size(),
                    generator.orphaned_nodes()
                );
                return Ok(Some(compiled));
            }
        }

        log::debug!("{signature}: basket {:?} left the layout incomplete", basket.basket_num());
        Ok(None)
    }

    /// Read every entry of `basket` on the interpreted path.
    pub fn interpret(&self, basket: &Basket) -> Result<Vec<Value>> {
        let streamer = Streamer::new(&self.registry);
        let ctx = ReadContext::new(&self.options);
        entries(basket)?
            .map(|entry| streamer.read(&self.ty, None, &mut Cursor::new(entry?), &ctx, None))
            .collect()
    }

    /// The compiled model if one is available, else the interpreted values.
    pub fn basket_array(&self, basket: &Basket) -> Result<BasketArray> {
        match self.compile(basket)? {
            Some(model) => Ok(BasketArray::Compiled(model)),
            None => Ok(BasketArray::Interpreted(self.interpret(basket)?)),
        }
    }

    /// [`ObjectInterpretation::basket_array`] for many baskets, on the rayon
    /// pool when [`ReadOptions::parallel`] is set.
    pub fn basket_arrays(&self, baskets: &[Basket]) -> Result<Vec<BasketArray>> {
        if self.options.parallel {
            baskets.par_iter().map(|b| self.basket_array(b)).collect()
        } else {
            baskets.iter().map(|b| self.basket_array(b)).collect()
        }
    }

    /// Decode the baskets at `seeks` in `source` and interpret them.
    pub fn read_baskets(
        &self,
        source: &[u8],
        seeks: &[u64],
        decompressor: &dyn Decompressor,
    ) -> Result<Vec<BasketArray>> {
        let baskets =
            decode_baskets(source, seeks, &BasketContext::default(), decompressor, self.options.parallel)?;
        self.basket_arrays(&baskets)
    }
}

/// Everything a compiled model depends on: the type, the header and offset
/// options the contributors read, and the layouts the type reaches.
fn model_key(ty: &TypeDesc, registry: &ClassRegistry, options: &ReadOptions) -> String {
    format!(
        "{} header={} tobject_header={} offsets={} layouts={:016x}",
        ty.signature(),
        options.header,
        options.tobject_header,
        options.index_format.output_type(),
        registry.fingerprint(ty)
    )
}

/// Entry byte ranges of an object basket.
fn entries(basket: &Basket) -> Result<impl Iterator<Item = Result<&[u8]>>> {
    let missing = || {
        RootError::Deserialization(format!(
            "object basket {:?} has no entry offsets",
            basket.basket_num()
        ))
    };
    let offsets = basket.byte_offsets().ok_or_else(missing)?;
    let data = basket.data().ok_or_else(missing)?;
    Ok(offsets.windows(2).map(move |w| {
        data.get(w[0]..w[1]).ok_or_else(|| {
            RootError::Deserialization(format!(
                "entry range {}..{} outside {} data bytes",
                w[0],
                w[1],
                data.len()
            ))
        })
    }))
}
