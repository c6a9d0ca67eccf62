//! Rendering fast paths as formatted Rust source

use crate::{constants::BLOCK_NAME_PREFIX, emitter::FastPath};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

/// Identifier of the block function translated from `pc`.
pub fn block_ident(pc: u32) -> proc_macro2::Ident {
    format_ident!("{}{:08x}", BLOCK_NAME_PREFIX, pc)
}

/// Wrap a block body and its control-flow tail in a block function.
pub fn block_fn_tokens(pc: u32, body: &[TokenStream], fast_path: &FastPath) -> TokenStream {
    let name = block_ident(pc);
    let tail = &fast_path.code;
    quote! {
        pub fn #name(emu: &mut ExecContext) -> Result<crate::NextStep, String> {
            #(#body)*
            #tail
        }
    }
}

/// Render block functions as a standalone, formatted source file.
pub fn render_file(blocks: &[TokenStream]) -> Result<String, String> {
    let file = quote! {
        // AUTO-GENERATED control-flow fast paths
        pub use pico_dbt_runtime::{ExecContext, NextStep};

        #(#blocks)*
    };
    let syntax_tree: syn::File =
        syn::parse2(file).map_err(|e| format!("Parse error in generated blocks: {}", e))?;
    Ok(prettyplease::unparse(&syntax_tree))
}

/// Render a single block whose only statement is `fast_path`.
pub fn render_block(pc: u32, fast_path: &FastPath) -> Result<String, String> {
    render_file(&[block_fn_tokens(pc, &[], fast_path)])
}
