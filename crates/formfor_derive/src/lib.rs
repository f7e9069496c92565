use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Path, parse_macro_input};

/// Derives `formfor::value::FormObject`, `IntoValue` and `FromValue`.
///
/// Container: `#[form(kind = "User")]` sets the kind name reported in
/// diagnostics (the struct name by default).
///
/// Fields: `#[form(kind = "email", error = "altName", validate = check_fn,
/// label = "E-mail", rename = "emailAddress", skip)]`. Any other
/// `key = "literal"` pair is kept as a schema hint.
#[proc_macro_derive(FormObject, attributes(form))]
pub fn derive_form_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

struct FieldSpec {
    ident: Ident,
    key: String,
    kind: Option<LitStr>,
    error: Option<LitStr>,
    validate: Option<Path>,
    hints: Vec<(String, LitStr)>,
    skip: bool,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "FormObject derive currently supports only non-generic structs",
        ));
    }

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "FormObject derive requires a struct with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "FormObject derive is only supported on structs",
            ));
        }
    };

    let object_ident = input.ident;
    let kind_name = container_kind(&input.attrs)?.unwrap_or_else(|| object_ident.to_string());
    let specs = named_fields
        .into_iter()
        .filter_map(|field| field.ident.clone().map(|ident| (ident, field.attrs)))
        .map(|(ident, attrs)| field_spec(ident, &attrs))
        .collect::<syn::Result<Vec<_>>>()?;

    let formfor = formfor_path();
    let mut properties = Vec::new();
    let mut writes = Vec::new();
    let mut reads = Vec::new();

    for spec in &specs {
        let ident = &spec.ident;
        if spec.skip {
            reads.push(quote! { #ident: ::core::default::Default::default() });
            continue;
        }
        let key = &spec.key;

        let mut property = quote! { #formfor::schema::SchemaProperty::new() };
        if let Some(kind) = &spec.kind {
            property = quote! { #property.kind(#kind) };
        }
        if let Some(error) = &spec.error {
            property = quote! { #property.error(#formfor::schema::ValidatorSpec::literal(#error)) };
        }
        if let Some(validate) = &spec.validate {
            property = quote! { #property.validate(#validate) };
        }
        for (hint, value) in &spec.hints {
            property = quote! { #property.hint(#hint, #value) };
        }
        properties.push(quote! { .property(#key, #property) });

        writes.push(quote! {
            .with(#key, #formfor::value::IntoValue::to_value(&self.#ident))
        });
        reads.push(quote! {
            #ident: #formfor::value::field_from_object(object, #key)?
        });
    }

    Ok(quote! {
        impl #formfor::value::FormObject for #object_ident {
            fn schema() -> #formfor::schema::Schema {
                #formfor::schema::Schema::new()
                    #(#properties)*
            }

            fn to_object(&self) -> #formfor::value::BoundObject {
                #formfor::value::BoundObject::named(#kind_name)
                    .with_schema(<Self as #formfor::value::FormObject>::schema())
                    #(#writes)*
            }

            fn from_object(
                object: &#formfor::value::BoundObject,
            ) -> #formfor::form::FormResult<Self> {
                Ok(Self {
                    #(#reads,)*
                })
            }
        }

        impl #formfor::value::IntoValue for #object_ident {
            fn to_value(&self) -> #formfor::value::Value {
                #formfor::value::Value::Object(
                    <Self as #formfor::value::FormObject>::to_object(self),
                )
            }
        }

        impl #formfor::value::FromValue for #object_ident {
            fn from_value(value: &#formfor::value::Value) -> ::core::option::Option<Self> {
                value
                    .as_object()
                    .and_then(|object| {
                        <Self as #formfor::value::FormObject>::from_object(object).ok()
                    })
            }
        }
    })
}

fn container_kind(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut kind = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("form")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("kind") {
                kind = Some(meta.value()?.parse::<LitStr>()?.value());
                Ok(())
            } else {
                Err(meta.error("unsupported container attribute, expected `kind`"))
            }
        })?;
    }
    Ok(kind)
}

fn field_spec(ident: Ident, attrs: &[Attribute]) -> syn::Result<FieldSpec> {
    let mut spec = FieldSpec {
        key: ident.to_string(),
        ident,
        kind: None,
        error: None,
        validate: None,
        hints: Vec::new(),
        skip: false,
    };

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("form")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                spec.skip = true;
            } else if meta.path.is_ident("kind") {
                spec.kind = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("error") {
                spec.error = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("validate") {
                spec.validate = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("rename") {
                spec.key = meta.value()?.parse::<LitStr>()?.value();
            } else if let Some(hint) = meta.path.get_ident().map(ToString::to_string) {
                let value = meta.value()?.parse::<LitStr>()?;
                spec.hints.push((hint, value));
            } else {
                return Err(meta.error("expected `key = \"value\"`"));
            }
            Ok(())
        })?;
    }

    if spec.error.is_some() && spec.validate.is_some() {
        return Err(syn::Error::new_spanned(
            &spec.ident,
            "`error` and `validate` cannot both be set on one field",
        ));
    }
    Ok(spec)
}

fn formfor_path() -> TokenStream2 {
    match crate_name("formfor") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::formfor),
    }
}
