extern crate proc_macro;
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemStruct};

/// Registers a filter type in the global filter registry at program start.
///
/// The struct must implement `crate::filters::filter::Filter`. The macro also
/// implements `FilterClass`, whose class name (the struct name) is the key the
/// filter is stored and persisted under. The generated constructor function is
/// named `register_filter_<snake_case_name>`.
#[proc_macro_attribute]
pub fn register_filter(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemStruct);
    let struct_name = &input.ident;
    let class_name = struct_name.to_string();

    let fn_name_str = heck::ToSnakeCase::to_snake_case(class_name.as_str());
    let fn_name = syn::Ident::new(
        &format!("register_filter_{}", fn_name_str),
        struct_name.span(),
    );

    let expanded = quote! {
        #input

        impl crate::filters::filter::FilterClass for #struct_name {
            fn class_name(&self) -> &'static str {
                #class_name
            }
        }

        #[ctor::ctor]
        fn #fn_name() {
            crate::filters::filter::FilterRegistry::register_filter::<#struct_name>();
        }
    };

    TokenStream::from(expanded)
}
