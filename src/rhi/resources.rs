//! Resource records stored in the device pools.
//!
//! A record owns the native object and the descriptor views created for it.
//! Views live in the CPU heaps; shader-resource and unordered-access views of
//! bindless resources also occupy one slot of the bindless table.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::Backend;
use crate::rhi::descriptor_heap::DescriptorAllocation;
use crate::types::{
    BufferDesc, ComputePsoDesc, DescriptorIndex, Format, GraphicsPsoDesc, ShaderDesc,
    SubresourceRange, SubresourceType, TextureDesc,
};

/// One descriptor view of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DescriptorView {
    pub allocation: DescriptorAllocation,
    pub bindless: DescriptorIndex,
    pub kind: SubresourceType,
    pub range: SubresourceRange,
}

/// Main views, one per binding kind.
#[derive(Debug, Default, Clone)]
pub(crate) struct ViewSet {
    pub srv: Option<DescriptorView>,
    pub uav: Option<DescriptorView>,
    pub rtv: Option<DescriptorView>,
    pub dsv: Option<DescriptorView>,
    /// Views created through `create_*_subresource`, addressed by index.
    pub subresources: SmallVec<[DescriptorView; 4]>,
}

impl ViewSet {
    pub fn main(&self, kind: SubresourceType) -> Option<&DescriptorView> {
        match kind {
            SubresourceType::Srv => self.srv.as_ref(),
            SubresourceType::Uav => self.uav.as_ref(),
            SubresourceType::Rtv => self.rtv.as_ref(),
            SubresourceType::Dsv => self.dsv.as_ref(),
        }
    }

    /// Main view when `subresource` is `None`; otherwise the indexed view if
    /// it has the requested kind.
    pub fn find(&self, kind: SubresourceType, subresource: Option<u32>) -> Option<&DescriptorView> {
        match subresource {
            None => self.main(kind),
            Some(index) => self
                .subresources
                .get(index as usize)
                .filter(|view| view.kind == kind),
        }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = DescriptorView> + '_ {
        [self.srv.take(), self.uav.take(), self.rtv.take(), self.dsv.take()]
            .into_iter()
            .flatten()
            .chain(self.subresources.drain(..))
    }
}

pub(crate) struct TextureRecord<B: Backend> {
    pub desc: TextureDesc,
    pub native: Arc<B::Texture>,
    pub views: ViewSet,
}

impl<B: Backend> TextureRecord<B> {
    #[inline]
    pub fn format(&self) -> Format {
        self.desc.format
    }
}

pub(crate) struct BufferRecord<B: Backend> {
    pub desc: BufferDesc,
    pub native: Arc<B::Buffer>,
    pub views: ViewSet,
}

pub(crate) struct ShaderRecord<B: Backend> {
    pub desc: ShaderDesc,
    pub native: Arc<B::Shader>,
}

pub(crate) struct GraphicsPipelineRecord<B: Backend> {
    pub desc: GraphicsPsoDesc,
    pub native: Arc<B::GraphicsPipeline>,
}

pub(crate) struct ComputePipelineRecord<B: Backend> {
    pub desc: ComputePsoDesc,
    pub native: Arc<B::ComputePipeline>,
}
